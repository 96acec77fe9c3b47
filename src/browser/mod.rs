// src/browser/mod.rs

pub mod webdriver;

use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

pub use webdriver::{ChromeLauncher, ChromePage};

/// A browser failure, split by how the caller should recover from it.
#[derive(Debug, Error)]
pub enum PageError {
    /// The browser or driver connection is gone; only a new session helps.
    #[error("browser connection lost: {0}")]
    Connection(String),
    /// Anything else: element not ready, wrong option, timeouts.
    #[error("{0}")]
    Ui(String),
}

impl PageError {
    /// Sort a raw driver error message into one of the two kinds.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("connection refused")
            || lower.contains("no connection")
            || lower.contains("session")
        {
            PageError::Connection(message)
        } else {
            PageError::Ui(message)
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, PageError::Connection(_))
    }
}

/// What happened when a dropdown was asked to show a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    AlreadySet,
    Changed,
}

/// The handful of page operations the report form needs.
#[allow(async_fn_in_trait)]
pub trait FormPage {
    async fn open(&mut self, url: &str) -> Result<(), PageError>;

    /// Wait for `control` to be clickable and make `value` its selected option.
    /// A change must be followed by the control going stale and coming back.
    async fn select_option(
        &mut self,
        control: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<Selection, PageError>;

    /// Click `control` once it is present. `Ok(false)` if it never appeared.
    async fn click_if_present(
        &mut self,
        control: &str,
        timeout: Duration,
    ) -> Result<bool, PageError>;

    async fn quit(self) -> Result<(), PageError>;
}

/// Creates fresh browser pages.
#[allow(async_fn_in_trait)]
pub trait Launcher {
    type Page: FormPage;

    async fn launch(&self) -> Result<Self::Page, PageError>;
}

/// The one browser the scraper drives. Launched on first use.
pub struct Session<L: Launcher> {
    launcher: L,
    base_url: String,
    page: Option<L::Page>,
    launches: u32,
}

impl<L: Launcher> Session<L> {
    pub fn new(launcher: L, base_url: impl Into<String>) -> Self {
        Self {
            launcher,
            base_url: base_url.into(),
            page: None,
            launches: 0,
        }
    }

    /// The live page, launching a browser and loading the base page if needed.
    pub async fn page(&mut self) -> Result<&mut L::Page, PageError> {
        if self.page.is_none() {
            let mut page = self.launcher.launch().await?;
            self.launches += 1;
            if let Err(e) = page.open(&self.base_url).await {
                let _ = page.quit().await;
                return Err(e);
            }
            self.page = Some(page);
        }
        match self.page.as_mut() {
            Some(page) => Ok(page),
            None => Err(PageError::Connection("session not started".into())),
        }
    }

    /// Throw away the current browser and start a new one on the base page.
    /// A launch failure is logged; the next `page()` call tries again.
    pub async fn restart(&mut self) {
        info!("restarting browser session");
        self.quit().await;
        match self.page().await {
            Ok(_) => info!("browser session started"),
            Err(e) => error!(error = %e, "failed to start browser session"),
        }
    }

    pub async fn quit(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.quit().await {
                warn!(error = %e, "failed to quit browser");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.page.is_some()
    }

    /// Number of browsers launched over the session's lifetime.
    pub fn launches(&self) -> u32 {
        self.launches
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn classifies_connection_errors() {
        assert!(PageError::classify("Connection refused (os error 111)").is_connection());
        assert!(PageError::classify("invalid session id").is_connection());
        assert!(PageError::classify("No connection could be made").is_connection());
        assert!(!PageError::classify("element not interactable").is_connection());
    }

    #[tokio::test]
    async fn session_launches_lazily_and_restarts() {
        let launcher = FakeLauncher::default();
        let script = launcher.script.clone();
        let mut session = Session::new(launcher, "https://example.test/form");

        assert!(!session.is_running());
        assert_eq!(script.borrow().launches, 0);

        session.page().await.unwrap();
        session.page().await.unwrap();
        assert_eq!(script.borrow().launches, 1);
        assert_eq!(script.borrow().calls, vec!["open https://example.test/form"]);

        session.restart().await;
        assert_eq!(script.borrow().launches, 2);
        assert_eq!(script.borrow().quits, 1);

        session.quit().await;
        assert!(!session.is_running());
        assert_eq!(script.borrow().quits, 2);
    }

    #[tokio::test]
    async fn failed_restart_is_retried_on_next_use() {
        let launcher = FakeLauncher::default();
        let script = launcher.script.clone();
        script.borrow_mut().fail_launches = 1;
        let mut session = Session::new(launcher, "https://example.test/form");

        session.restart().await;
        assert!(!session.is_running());
        session.page().await.unwrap();
        assert!(session.is_running());
        assert_eq!(session.launches(), 1);
    }
}
