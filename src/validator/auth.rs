// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authentication policies consulted for operations that declare `security`.

use std::fmt;

use async_trait::async_trait;
use log::trace;

use super::RequestParts;
use crate::spec::{Operation, SecurityRequirement};

/// Decides whether a request satisfies one security requirement alternative.
#[async_trait]
pub trait AuthenticationPolicy: fmt::Debug + Send + Sync {
    /// Policy name for logging.
    fn name(&self) -> &str;

    /// `Ok(())` when `requirement` is satisfied, otherwise a reason.
    async fn authenticate(
        &self,
        operation: &Operation,
        requirement: &SecurityRequirement,
        parts: &RequestParts<'_>,
    ) -> Result<(), String>;
}

/// Pass-through policy: every security requirement is satisfied.
///
/// Credentials are checked by the backend; the sidecar only enforces the
/// structural contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllAuthentication;

#[async_trait]
impl AuthenticationPolicy for AcceptAllAuthentication {
    fn name(&self) -> &str {
        "accept_all"
    }

    async fn authenticate(
        &self,
        operation: &Operation,
        requirement: &SecurityRequirement,
        _parts: &RequestParts<'_>,
    ) -> Result<(), String> {
        trace!(
            "Accepting security requirement {:?} for {}",
            requirement.keys().collect::<Vec<_>>(),
            operation.display_name()
        );
        Ok(())
    }
}
