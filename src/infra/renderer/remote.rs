use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::histogram;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::application::render::{RenderError, Renderer, Viewport};

const ERROR_BODY_LIMIT: usize = 512;

/// Remote rendering API adapter, used when the local browser is unavailable
/// or exhausted.
///
/// The API accepts raw HTML text directly (same input contract as the local
/// path) and returns the capture as the raw response body. The service is
/// quota-limited; quota exhaustion is a normal failure mode, not a bug.
pub struct RemoteRenderer {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    viewport: Viewport,
    render_delay: Duration,
}

#[derive(Serialize)]
struct RemoteRenderRequest<'a> {
    html: &'a str,
    viewport: Viewport,
    format: &'static str,
    full_page: bool,
    delay_ms: u64,
}

impl RemoteRenderer {
    pub fn new(
        endpoint: Url,
        api_key: String,
        viewport: Viewport,
        render_delay: Duration,
        request_timeout: Duration,
    ) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| RenderError::Network {
                message: format!("failed to build HTTP client: {err}"),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            viewport,
            render_delay,
        })
    }
}

#[async_trait]
impl Renderer for RemoteRenderer {
    async fn render(&self, html: &str) -> Result<Bytes, RenderError> {
        let started_at = Instant::now();

        let body = RemoteRenderRequest {
            html,
            viewport: self.viewport,
            format: "png",
            full_page: true,
            delay_ms: self.render_delay.as_millis() as u64,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RenderError::Timeout {
                        seconds: started_at.elapsed().as_secs(),
                    }
                } else {
                    RenderError::Network {
                        message: err.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
            warn!(
                target = "infra::renderer::remote",
                status = status.as_u16(),
                "Rendering API quota exhausted"
            );
            return Err(RenderError::Quota {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut body = body;
            body.truncate(ERROR_BODY_LIMIT);
            return Err(RenderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|err| RenderError::Network {
            message: format!("failed to read capture body: {err}"),
        })?;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!("scatto_render_ms").record(elapsed_ms as f64);
        info!(
            target = "infra::renderer::remote",
            elapsed_ms,
            capture_bytes = bytes.len(),
            "Page captured via rendering API"
        );

        Ok(bytes)
    }

    fn name(&self) -> &'static str {
        "remote-api"
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::extract::Json;
    use axum::http::StatusCode;
    use axum::routing::post;

    use super::*;

    async fn spawn_server(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        Url::parse(&format!("http://{addr}/render")).expect("url")
    }

    fn renderer(endpoint: Url) -> RemoteRenderer {
        RemoteRenderer::new(
            endpoint,
            "test-key".to_string(),
            Viewport {
                width: 1280,
                height: 1024,
                scale: 1,
            },
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .expect("renderer")
    }

    #[tokio::test]
    async fn posts_html_and_returns_capture_bytes() {
        let router = Router::new().route(
            "/render",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["html"], "<h1>listing</h1>");
                assert_eq!(body["viewport"]["width"], 1280);
                assert_eq!(body["viewport"]["height"], 1024);
                assert_eq!(body["format"], "png");
                assert_eq!(body["full_page"], true);
                Bytes::from_static(b"PNGDATA")
            }),
        );
        let endpoint = spawn_server(router).await;

        let bytes = renderer(endpoint)
            .render("<h1>listing</h1>")
            .await
            .expect("capture");
        assert_eq!(bytes, Bytes::from_static(b"PNGDATA"));
    }

    #[tokio::test]
    async fn quota_exhaustion_maps_to_quota_error() {
        let router = Router::new().route(
            "/render",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "monthly quota exceeded") }),
        );
        let endpoint = spawn_server(router).await;

        let err = renderer(endpoint)
            .render("<h1>listing</h1>")
            .await
            .expect_err("quota");
        assert!(
            matches!(err, RenderError::Quota { status: 429 }),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn server_errors_map_to_http_error() {
        let router = Router::new().route(
            "/render",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "render farm on fire") }),
        );
        let endpoint = spawn_server(router).await;

        let err = renderer(endpoint)
            .render("<h1>listing</h1>")
            .await
            .expect_err("http error");
        match err {
            RenderError::Http { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("render farm"), "body: {body}");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_maps_to_network_error() {
        let endpoint = Url::parse("http://127.0.0.1:9/render").expect("url");
        let err = renderer(endpoint)
            .render("<h1>listing</h1>")
            .await
            .expect_err("network error");
        assert!(
            matches!(err, RenderError::Network { .. } | RenderError::Timeout { .. }),
            "unexpected error: {err:?}"
        );
    }
}
