use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::histogram;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::application::render::{RenderError, Renderer, Viewport};

const CAPTURE_FILENAME: &str = "capture.png";

/// Local headless-browser renderer.
///
/// Every invocation launches a fresh browser process against a temporary
/// HTML file and tears it down afterward, so no page state (cookies, script
/// globals) survives between jobs. The virtual-time budget keeps the page
/// alive past load and network-idle so late DOM mutations land before
/// capture.
#[derive(Debug)]
pub struct ChromiumRenderer {
    binary: PathBuf,
    viewport: Viewport,
    settle: Duration,
    hard_timeout: Duration,
}

impl ChromiumRenderer {
    pub fn new(
        binary: PathBuf,
        viewport: Viewport,
        settle: Duration,
        hard_timeout: Duration,
    ) -> Self {
        Self {
            binary,
            viewport,
            settle,
            hard_timeout,
        }
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render(&self, html: &str) -> Result<Bytes, RenderError> {
        let started_at = Instant::now();

        let workdir = TempDir::new()?;
        let input_path = workdir.path().join("input.html");
        let output_path = workdir.path().join(CAPTURE_FILENAME);
        tokio::fs::write(&input_path, html).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg(format!(
                "--window-size={},{}",
                self.viewport.width, self.viewport.height
            ))
            .arg(format!(
                "--force-device-scale-factor={}",
                self.viewport.scale
            ))
            .arg(format!(
                "--virtual-time-budget={}",
                self.settle.as_millis()
            ))
            .arg(format!("--screenshot={}", output_path.display()))
            .arg(format!("file://{}", input_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.hard_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    target = "infra::renderer::chromium",
                    binary = %self.binary.display(),
                    "Browser binary not found"
                );
                return Err(RenderError::unavailable(format!(
                    "browser binary `{}` not found",
                    self.binary.display()
                )));
            }
            Ok(Err(err)) => return Err(RenderError::Io(err)),
            Err(_) => {
                warn!(
                    target = "infra::renderer::chromium",
                    timeout_s = self.hard_timeout.as_secs(),
                    "Browser process exceeded hard timeout; killed"
                );
                return Err(RenderError::Timeout {
                    seconds: self.hard_timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "infra::renderer::chromium",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "Browser invocation failed"
            );
            return Err(RenderError::Engine { exit_code, stderr });
        }

        let bytes = match tokio::fs::read(&output_path).await {
            Ok(bytes) if !bytes.is_empty() => Bytes::from(bytes),
            Ok(_) => {
                return Err(RenderError::InvalidOutput {
                    message: "browser wrote an empty capture".to_string(),
                });
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RenderError::InvalidOutput {
                    message: "browser exited cleanly without writing a capture".to_string(),
                });
            }
            Err(err) => return Err(RenderError::Io(err)),
        };

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!("scatto_render_ms").record(elapsed_ms as f64);
        info!(
            target = "infra::renderer::chromium",
            elapsed_ms,
            capture_bytes = bytes.len(),
            "Page captured via headless browser"
        );

        Ok(bytes)
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}
