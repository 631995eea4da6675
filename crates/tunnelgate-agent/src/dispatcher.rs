//! Executes tunneled requests as plain HTTP calls

use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;
use tracing::{debug, warn};
use tunnelgate_control::RequestDispatcher;
use tunnelgate_proto::{RequestData, RequestEnvelope};

use crate::error::AgentError;

/// Calls the service a request names and replies with the response body
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Perform the call described by `request` and return the response body
    ///
    /// The body is returned whatever the status code; the caller only ever
    /// sees the payload.
    pub async fn execute(&self, request: &RequestData) -> Result<String, AgentError> {
        let method = parse_method(&request.http_method)?;
        let url = request.target_url();

        let mut builder = self.client.request(method.clone(), &url);
        if !request.payload.is_empty() {
            builder = builder.body(request.payload.clone());
        }

        let response = builder.send().await?;
        debug!(
            method = %method,
            url = %url,
            status = response.status().as_u16(),
            "Service responded"
        );

        Ok(response.text().await?)
    }
}

/// Missing method means GET
fn parse_method(method: &str) -> Result<Method, AgentError> {
    let method = method.trim();
    if method.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| AgentError::InvalidMethod(method.to_string()))
}

#[async_trait]
impl RequestDispatcher for HttpDispatcher {
    async fn dispatch(&self, request: RequestEnvelope) -> String {
        match self.execute(&request.request_data).await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    service = %request.request_data.service_name,
                    endpoint = %request.request_data.service_endpoint,
                    "Request failed: {}",
                    e
                );
                // Answer anyway so the caller is not left waiting for the timeout
                format!("agent error: {}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;

    async fn start_service() -> SocketAddr {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/echo",
                get(|| async { "no body" }).post(|body: String| async move { body }),
            )
            .route(
                "/missing",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "nothing here") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn envelope(service: String, endpoint: &str, method: &str, payload: &str) -> RequestEnvelope {
        RequestEnvelope::new("agent-1", RequestData::new(service, endpoint, method, payload))
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method("").unwrap(), Method::GET);
        assert_eq!(parse_method(" POST ").unwrap(), Method::POST);
        assert!(parse_method("NOT A METHOD").is_err());
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let addr = start_service().await;
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let body = dispatcher
            .dispatch(envelope(addr.to_string(), "/health", "GET", ""))
            .await;
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_payload_is_sent_as_body() {
        let addr = start_service().await;
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let body = dispatcher
            .dispatch(envelope(format!("http://{}/", addr), "echo", "POST", "hello"))
            .await;
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_error_status_still_returns_body() {
        let addr = start_service().await;
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let body = dispatcher
            .dispatch(envelope(addr.to_string(), "/missing", "GET", ""))
            .await;
        assert_eq!(body, "nothing here");
    }

    #[tokio::test]
    async fn test_unreachable_service_replies_with_error_text() {
        // Bind and drop to get a port nobody listens on
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let body = dispatcher
            .dispatch(envelope(addr.to_string(), "/health", "GET", ""))
            .await;
        assert!(body.starts_with("agent error:"), "got {}", body);
    }

    #[tokio::test]
    async fn test_invalid_method_replies_with_error_text() {
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let body = dispatcher
            .dispatch(envelope("localhost:1".to_string(), "/", "BAD METHOD", ""))
            .await;
        assert!(body.contains("Unsupported HTTP method"), "got {}", body);
    }
}
