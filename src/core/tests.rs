// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use crate::core::forward::strip_hop_by_hop;
    use crate::core::{
        ErrorMessage, ForwardingEngine, ProxyCore, ProxyError, ProxyRequest, RequestBody,
    };
    use crate::spec::SpecLoader;
    use crate::validator::{ValidationError, ValidationErrorKind};
    use bytes::Bytes;
    use futures_util::stream::{self, StreamExt};
    use http_body_util::BodyExt;
    use reqwest::Method;
    use reqwest::header::{HeaderMap, HeaderValue};
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PETSTORE: &str = include_str!("../../tests/resources/petstore.yaml");

    const FILES: &str = r#"
openapi: 3.0.3
paths:
  /files/{name}:
    get:
      parameters:
        - name: name
          in: path
          required: true
          schema:
            type: string
  /search:
    get:
      parameters:
        - name: q
          in: query
          required: true
          schema:
            type: string
"#;

    fn core_for(backend: &MockServer) -> ProxyCore {
        let forwarder = ForwardingEngine::with_base_url(&backend.uri(), Duration::from_secs(5)).unwrap();
        ProxyCore::new(Arc::new(SpecLoader::parse(PETSTORE).unwrap()), forwarder)
    }

    async fn body_text(body: reqwest::Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn chunked(chunks: &[&'static str]) -> RequestBody {
        let items: Vec<Result<Bytes, io::Error>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        RequestBody::from_stream(stream::iter(items).boxed())
    }

    #[test]
    fn test_error_status_mapping() {
        let rejected = ProxyError::Rejected(vec![ValidationError::no_matching_operation()]);
        assert_eq!(rejected.status(), 400);
        assert_eq!(rejected.to_string(), "no matching operation was found");

        assert_eq!(ProxyError::RequestBody(io::Error::other("reset")).status(), 400);
        assert_eq!(ProxyError::Timeout(Duration::from_secs(1)).status(), 502);
        assert_eq!(ProxyError::Other("boom".into()).status(), 500);

        let from_single: ProxyError = ValidationError::new(ValidationErrorKind::MissingRequestBody, "missing request body").into();
        assert!(matches!(from_single, ProxyError::Rejected(ref errors) if errors.len() == 1));
    }

    #[test]
    fn test_error_message_json() {
        let json = ErrorMessage::new(400, "missing request body").to_json().unwrap();
        assert_eq!(
            String::from_utf8(json).unwrap(),
            r#"{"code":"400","message":"missing request body"}"#
        );
    }

    #[test]
    fn test_request_splits_target() {
        let request = ProxyRequest::new(
            Method::GET,
            "/pet/findByStatus?status=sold&x=%20",
            HeaderMap::new(),
            RequestBody::empty(),
        );
        assert_eq!(request.path, "/pet/findByStatus");
        assert_eq!(request.query.as_deref(), Some("status=sold&x=%20"));
        assert_eq!(request.path_and_query, "/pet/findByStatus?status=sold&x=%20");
        assert_eq!(request.info.path, "/pet/findByStatus");
    }

    #[tokio::test]
    async fn test_request_body_presence() {
        assert!(!RequestBody::empty().is_present().await.unwrap());
        assert!(!RequestBody::from_bytes(Bytes::new()).is_present().await.unwrap());
        assert!(RequestBody::from_bytes("x").is_present().await.unwrap());

        // Empty chunks are skipped before deciding
        assert!(chunked(&["", "", "data"]).is_present().await.unwrap());
        assert!(!chunked(&["", ""]).is_present().await.unwrap());

        let failing: Vec<Result<Bytes, io::Error>> = vec![Err(io::Error::other("reset"))];
        let mut body = RequestBody::from_stream(stream::iter(failing).boxed());
        assert!(body.is_present().await.is_err());
    }

    #[tokio::test]
    async fn test_peeked_chunk_is_put_back() {
        let mut body = chunked(&["hello ", "world"]);
        assert!(body.is_present().await.unwrap());

        let outbound = body.into_reqwest_body().unwrap();
        assert_eq!(body_text(outbound).await, "hello world");

        assert!(RequestBody::empty().into_reqwest_body().is_none());
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-session-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-session-hop", HeaderValue::from_static("1"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn test_target_url() {
        let engine = ForwardingEngine::new(8080, Duration::from_secs(3)).unwrap();
        assert_eq!(engine.base_url(), "http://127.0.0.1:8080");
        assert_eq!(engine.timeout(), Duration::from_secs(3));
        assert_eq!(
            engine.target_url("/pet/findByStatus?status=a%2Cb").unwrap().to_string(),
            "http://127.0.0.1:8080/pet/findByStatus?status=a%2Cb"
        );

        let engine = ForwardingEngine::with_base_url("http://localhost:9000/", Duration::from_secs(1)).unwrap();
        assert_eq!(engine.target_url("/x").unwrap().to_string(), "http://localhost:9000/x");

        // Dot segments are not resolved
        let uri = engine.target_url("/user/../admin").unwrap();
        assert_eq!(uri.path_and_query().unwrap().as_str(), "/user/../admin");
    }

    #[test]
    fn test_invalid_backend_url() {
        assert!(ForwardingEngine::with_base_url("not a url", Duration::from_secs(1)).is_err());
        assert!(ForwardingEngine::with_base_url("https://localhost:9000", Duration::from_secs(1)).is_err());
    }

    /// Accept one connection, answer 204 and return the raw request line.
    async fn capture_request_line(listener: TcpListener) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&chunk[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        String::from_utf8_lossy(&head)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_request_target_reaches_backend_unchanged() {
        let spec = Arc::new(SpecLoader::parse(FILES).unwrap());
        let targets = [
            "/files/..",
            "/files/%2e%2e",
            "/files/.",
            "/search?q=\"x\"",
            "/search?q=a'b%2C{c}",
        ];

        for target in targets {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let captured = tokio::spawn(capture_request_line(listener));

            let core = ProxyCore::new(spec.clone(), ForwardingEngine::new(port, Duration::from_secs(2)).unwrap());
            let response = core
                .process_request(ProxyRequest::new(Method::GET, target, HeaderMap::new(), RequestBody::empty()))
                .await
                .unwrap();
            assert_eq!(response.status, 204, "{target}");
            assert_eq!(captured.await.unwrap(), format!("GET {target} HTTP/1.1"));
        }
    }

    #[tokio::test]
    async fn test_process_request_forwards_valid_request() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pet/findByStatus"))
            .and(query_param("status", "sold"))
            .and(header("x-request-id", "abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-backend", "petstore")
                    .set_body_string("hello world"),
            )
            .expect(1)
            .mount(&backend)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        let request = ProxyRequest::new(Method::GET, "/pet/findByStatus?status=sold", headers, RequestBody::empty());

        let response = core_for(&backend).process_request(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("server").unwrap(), "openapi-sidecar");
        assert_eq!(response.headers.get("x-backend").unwrap(), "petstore");
        assert_eq!(body_text(response.body).await, "hello world");
    }

    #[tokio::test]
    async fn test_backend_status_is_relayed() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pet/404"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Pet not found"))
            .mount(&backend)
            .await;

        let core = core_for(&backend).with_server_name("petstore-guard").unwrap();
        let response = core
            .process_request(ProxyRequest::new(Method::GET, "/pet/404", HeaderMap::new(), RequestBody::empty()))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.headers.get("server").unwrap(), "petstore-guard");
        assert_eq!(body_text(response.body).await, "Pet not found");

        assert!(core_for(&backend).with_server_name("bad\nname").is_err());
    }

    #[tokio::test]
    async fn test_streamed_body_reaches_backend() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pet"))
            .and(body_string(r#"{"name":"doggie","photoUrls":[]}"#))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&backend)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let body = chunked(&[r#"{"name":"doggie","#, r#""photoUrls":[]}"#]);

        let response = core_for(&backend)
            .process_request(ProxyRequest::new(Method::POST, "/pet", headers, body))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_rejected_request_never_reaches_backend() {
        let backend = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&backend)
            .await;
        let core = core_for(&backend);

        let err = core
            .process_request(ProxyRequest::new(Method::GET, "/unknownoperation", HeaderMap::new(), RequestBody::empty()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(err.to_string(), "no matching operation was found");

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let err = core
            .process_request(ProxyRequest::new(Method::POST, "/pet", headers, RequestBody::empty()))
            .await
            .unwrap_err();
        match err {
            ProxyError::Rejected(errors) => assert_eq!(errors[0].kind, ValidationErrorKind::MissingRequestBody),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validate_only() {
        let backend = MockServer::start().await;
        let core = core_for(&backend);

        let mut request = ProxyRequest::new(Method::GET, "/user/login?username=u", HeaderMap::new(), RequestBody::empty());
        let result = core.validate(&mut request).await.unwrap();
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.first_error().unwrap().message, "missing required parameter: password");
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Grab a free port, then close it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let forwarder = ForwardingEngine::new(port, Duration::from_secs(2)).unwrap();
        let core = ProxyCore::new(Arc::new(SpecLoader::parse(PETSTORE).unwrap()), forwarder);

        let err = core
            .process_request(ProxyRequest::new(Method::GET, "/pet/findByStatus", HeaderMap::new(), RequestBody::empty()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::ClientError(_)));
        assert_eq!(err.status(), 502);
    }

    #[tokio::test]
    async fn test_backend_timeout() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&backend)
            .await;

        let forwarder = ForwardingEngine::with_base_url(&backend.uri(), Duration::from_millis(200)).unwrap();
        let core = ProxyCore::new(Arc::new(SpecLoader::parse(PETSTORE).unwrap()), forwarder);

        let err = core
            .process_request(ProxyRequest::new(Method::GET, "/pet/1", HeaderMap::new(), RequestBody::empty()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Timeout(d) if d == Duration::from_millis(200)));
        assert_eq!(err.status(), 502);
    }
}
