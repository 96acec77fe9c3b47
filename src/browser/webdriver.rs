// src/browser/webdriver.rs

use super::{FormPage, Launcher, PageError, Selection};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thirtyfour::{
    components::SelectElement, prelude::*, ChromeCapabilities, ChromiumLikeCapabilities,
};
use tokio::time::sleep;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const STATUS_RETRIES: u32 = 10;
const STATUS_DELAY: Duration = Duration::from_secs(2);

impl From<WebDriverError> for PageError {
    fn from(e: WebDriverError) -> Self {
        PageError::classify(e.to_string())
    }
}

/// Starts Chrome sessions through a running chromedriver.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    client: Client,
    webdriver_url: String,
    download_dir: PathBuf,
    headless: bool,
}

impl ChromeLauncher {
    pub fn new(
        webdriver_url: impl Into<String>,
        download_dir: impl AsRef<Path>,
        headless: bool,
    ) -> Result<Self> {
        let download_dir = std::path::absolute(download_dir.as_ref()).with_context(|| {
            format!("resolving download dir {}", download_dir.as_ref().display())
        })?;
        Ok(Self {
            client: Client::new(),
            webdriver_url: webdriver_url.into(),
            download_dir,
            headless,
        })
    }

    fn capabilities(&self) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();
        if self.headless {
            caps.set_headless()?;
        }
        caps.add_arg("--ignore-certificate-errors")?;
        caps.add_arg("--ignore-ssl-errors")?;
        caps.add_experimental_option(
            "prefs",
            serde_json::json!({
                "download.default_directory": self.download_dir.display().to_string(),
                "download.prompt_for_download": false,
            }),
        )?;
        Ok(caps)
    }
}

impl Launcher for ChromeLauncher {
    type Page = ChromePage;

    async fn launch(&self) -> Result<ChromePage, PageError> {
        wait_for_webdriver(&self.client, &self.webdriver_url, STATUS_RETRIES, STATUS_DELAY)
            .await
            .map_err(|e| PageError::Connection(format!("{:#}", e)))?;
        debug!(url = %self.webdriver_url, headless = self.headless, "launching chrome");
        let caps = self.capabilities()?;
        let driver = WebDriver::new(self.webdriver_url.as_str(), caps).await?;
        if let Err(e) = driver.set_window_rect(0, 0, 1920, 1080).await {
            warn!(error = %e, "could not resize browser window");
        }
        Ok(ChromePage { driver })
    }
}

/// A live Chrome window.
pub struct ChromePage {
    driver: WebDriver,
}

impl FormPage for ChromePage {
    async fn open(&mut self, url: &str) -> Result<(), PageError> {
        debug!(%url, "opening page");
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn select_option(
        &mut self,
        control: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<Selection, PageError> {
        let dropdown = self
            .driver
            .query(By::Id(control))
            .wait(timeout, POLL_INTERVAL)
            .and_clickable()
            .first()
            .await?;
        let select = SelectElement::new(&dropdown).await?;

        let current = select.first_selected_option().await?.value().await?;
        if current.as_deref() == Some(value) {
            return Ok(Selection::AlreadySet);
        }

        select.select_by_value(value).await?;
        // The form posts back on change: the old element dies and a new one appears.
        dropdown
            .wait_until()
            .wait(timeout, POLL_INTERVAL)
            .stale()
            .await?;
        self.driver
            .query(By::Id(control))
            .wait(timeout, POLL_INTERVAL)
            .and_clickable()
            .first()
            .await?;
        Ok(Selection::Changed)
    }

    async fn click_if_present(
        &mut self,
        control: &str,
        timeout: Duration,
    ) -> Result<bool, PageError> {
        let Some(element) = self
            .driver
            .query(By::Id(control))
            .wait(timeout, POLL_INTERVAL)
            .first_opt()
            .await?
        else {
            return Ok(false);
        };
        element.click().await?;
        Ok(true)
    }

    async fn quit(self) -> Result<(), PageError> {
        self.driver.quit().await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    value: StatusValue,
}

#[derive(Deserialize)]
struct StatusValue {
    #[serde(default)]
    ready: bool,
}

/// Poll chromedriver's `/status` until it reports ready.
pub async fn wait_for_webdriver(
    client: &Client,
    webdriver_url: &str,
    max_retries: u32,
    delay: Duration,
) -> Result<()> {
    let mut base = url::Url::parse(webdriver_url)
        .with_context(|| format!("parsing webdriver URL {}", webdriver_url))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let status_url = base.join("status").context("building webdriver status URL")?;

    let mut attempts = 0;
    loop {
        attempts += 1;
        let probe = async {
            client
                .get(status_url.clone())
                .send()
                .await?
                .error_for_status()?
                .json::<StatusResponse>()
                .await
        };
        match probe.await {
            Ok(status) if status.value.ready => return Ok(()),
            Ok(_) if attempts < max_retries => {
                debug!(attempt = attempts, "webdriver not ready yet");
            }
            Err(e) if attempts < max_retries => {
                warn!(url = %status_url, attempt = attempts, error = %e, "webdriver not reachable, retrying");
            }
            Ok(_) => anyhow::bail!("webdriver at {} never became ready", webdriver_url),
            Err(e) => {
                return Err(e).with_context(|| format!("webdriver at {} unreachable", webdriver_url))
            }
        }
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// Answer every request with `body` as JSON.
    async fn serve(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn ready_webdriver_passes() {
        let url = serve(r#"{"value":{"ready":true,"message":"ChromeDriver ready"}}"#).await;
        wait_for_webdriver(&Client::new(), &url, 1, Duration::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn busy_webdriver_fails_after_retries() {
        let url = serve(r#"{"value":{"ready":false}}"#).await;
        let err = wait_for_webdriver(&Client::new(), &url, 2, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("never became ready"));
    }

    #[tokio::test]
    async fn unreachable_webdriver_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let launcher = ChromeLauncher::new(format!("http://{}", addr), ".", true).unwrap();
        let err = wait_for_webdriver(&launcher.client, &launcher.webdriver_url, 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }

    #[test]
    fn download_dir_is_absolute() {
        let launcher = ChromeLauncher::new("http://localhost:9515", "downloads", true).unwrap();
        assert!(launcher.download_dir.is_absolute());
        assert!(launcher.capabilities().is_ok());
    }
}
