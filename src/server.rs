use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::envelope::{HttpResponse, InboundEvent};
use crate::handler::WebhookHandler;

/// Run one envelope invocation inside its own tracing span.
pub async fn invoke(handler: &WebhookHandler, event: &InboundEvent) -> HttpResponse {
    let span = tracing::info_span!(
        "event",
        request_id = %Uuid::new_v4(),
        method = %event.http_method
    );
    async {
        let response = handler.handle(event).await;
        info!(status = response.status_code, "Event handled");
        response
    }
    .instrument(span)
    .await
}

/// Router that feeds every path and method through the webhook handler,
/// plus a liveness probe.
pub fn router(handler: Arc<WebhookHandler>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .fallback(webhook)
        .with_state(handler)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn webhook(
    State(handler): State<Arc<WebhookHandler>>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let event = InboundEvent {
        http_method: method.as_str().to_string(),
        query_string_parameters: query,
        body: body_text(&body),
    };

    into_http(invoke(&handler, &event).await)
}

/// Non-UTF-8 bytes are replaced rather than rejected here, so the handler
/// still decides the response (token check first, then a JSON parse error).
fn body_text(body: &Bytes) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    match std::str::from_utf8(body) {
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            warn!("Request body is not valid UTF-8: {}", e);
            Some(String::from_utf8_lossy(body).into_owned())
        }
    }
}

fn into_http(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or_else(|_| {
        warn!("Invalid status code {}", response.status_code);
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Dropping invalid response header {}", name),
        }
    }

    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = status;
    *http.headers_mut() = headers;
    http
}

/// Serve until Ctrl-C.
pub async fn serve(handler: Arc<WebhookHandler>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Webhook listening on http://{}", addr);

    axum::serve(listener, router(handler))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down webhook server");
        })
        .await
        .context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_WEB_APP_URL;
    use crate::platform::{Notifier, OutgoingMessage};
    use crate::stats::StatsStore;
    use async_trait::async_trait;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn send_message(&self, _message: &OutgoingMessage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn app() -> Router {
        let handler = WebhookHandler::new(StatsStore::new(), None, DEFAULT_WEB_APP_URL, 20);
        router(Arc::new(handler))
    }

    fn app_with_token() -> Router {
        let notifier: Arc<dyn Notifier> = Arc::new(NoopNotifier);
        let handler =
            WebhookHandler::new(StatsStore::new(), Some(notifier), DEFAULT_WEB_APP_URL, 20);
        router(Arc::new(handler))
    }

    fn invalid_utf8_post() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("Content-Type", "application/json")
            .body(Body::from(vec![0xff, 0xfe, b'{']))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
    }

    #[tokio::test]
    async fn test_preflight_over_http() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            HeaderValue::from_static("*")
        );
        assert_eq!(
            response.headers()["access-control-max-age"],
            HeaderValue::from_static("86400")
        );
        assert_eq!(body_string(response).await, "");
    }

    #[tokio::test]
    async fn test_stats_over_http() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/?stats=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            HeaderValue::from_static("application/json")
        );
        let stats: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(stats["totalUsers"], 0);
        assert_eq!(stats["recentActivity"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_post_without_token_over_http() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"message":{"chat":{"id":1},"text":"/start"}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_string(response).await,
            r#"{"error":"Bot token not configured"}"#
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_body_without_token_over_http() {
        let response = app().oneshot(invalid_utf8_post()).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()["content-type"],
            HeaderValue::from_static("application/json")
        );
        assert_eq!(
            body_string(response).await,
            r#"{"error":"Bot token not configured"}"#
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_body_is_parse_error_over_http() {
        let response = app_with_token().oneshot(invalid_utf8_post()).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(!body["error"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_body_text() {
        assert_eq!(body_text(&Bytes::new()), None);
        assert_eq!(body_text(&Bytes::from_static(b"{}")).as_deref(), Some("{}"));
        assert_eq!(
            body_text(&Bytes::from_static(&[0xff, b'{'])).as_deref(),
            Some("\u{FFFD}{")
        );
    }

    #[tokio::test]
    async fn test_method_not_allowed_over_http() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            body_string(response).await,
            r#"{"error":"Method not allowed"}"#
        );
    }

    #[test]
    fn test_invalid_header_is_dropped() {
        let mut response = HttpResponse::error(500, "x");
        response
            .headers
            .insert("bad header".to_string(), "v".to_string());
        let http = into_http(response);
        assert_eq!(http.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(http.headers().len(), 1);
    }
}
