// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-alone sidecar binary.
//!
//!  Configure it with `PROXY_PORT`, `SERVICE_PORT` and `OPENAPI_PATH`.
//!  `SIDECAR_CONFIG_FILE` optionally points at a TOML/JSON/YAML file whose
//!  keys the environment overrides.

use std::env;
use std::error::Error;

use sidecar::{Sidecar, error_fmt, info_fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut loader = Sidecar::loader().with_env_vars();
    if let Ok(path) = env::var("SIDECAR_CONFIG_FILE") {
        println!("Using configuration from {path}");
        loader = loader.with_config_file(&path);
    }

    let sidecar = match loader.build().await {
        Ok(s) => s,
        Err(e) => {
            // Logging may not be up yet when configuration is broken
            eprintln!("Failed to start OpenAPI sidecar: {e}");
            return Err(e.into());
        }
    };

    match sidecar.start().await {
        Ok(()) => {
            info_fmt!("Sidecar", "Proxy server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error_fmt!("Sidecar", "Proxy server failed: {}", e);
            Err(e.into())
        }
    }
}
