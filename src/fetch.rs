// src/fetch.rs

use crate::browser::{FormPage, Launcher, Session};
use crate::config::TradeType;
use crate::navigate::{controls, select_dropdown_with_timeout, DropdownOutcome, UI_TIMEOUT};
use anyhow::{Context, Result};
use glob::glob;
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs,
    time::{sleep, Instant},
};
use tracing::{debug, error, info, warn};

const SELECT_ATTEMPTS: u32 = 3;
const PARTIAL_SUFFIX: &str = ".crdownload";

/// One report: what `reporter` traded with `partner` in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportKey {
    pub reporter: String,
    pub partner: String,
    pub trade_type: TradeType,
}

impl ReportKey {
    pub fn new(
        reporter: impl Into<String>,
        partner: impl Into<String>,
        trade_type: TradeType,
    ) -> Self {
        Self {
            reporter: reporter.into(),
            partner: partner.into(),
            trade_type,
        }
    }

    /// `{reporter}_{partner}_{tradeType}.html`
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.html", self.reporter, self.partner, self.trade_type)
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.reporter, self.partner, self.trade_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The report is on disk at this path.
    Success(PathBuf),
    /// The page offers no export for this selection.
    NoExportControl,
    /// Something on the page did not work out; worth another go.
    TransientFailure,
    /// The browser connection died.
    ConnectionFailure,
}

/// Timeouts used while driving the form.
#[derive(Debug, Clone, Copy)]
pub struct FetchTimeouts {
    pub ui: Duration,
    pub export_control: Duration,
    pub download: Duration,
    pub poll: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            ui: UI_TIMEOUT,
            export_control: Duration::from_secs(10),
            download: Duration::from_secs(60),
            poll: Duration::from_millis(500),
        }
    }
}

/// Downloads reports into one directory, one file per `ReportKey`.
#[derive(Debug, Clone)]
pub struct ReportFetcher {
    download_dir: PathBuf,
    timeouts: FetchTimeouts,
}

impl ReportFetcher {
    pub fn new(download_dir: impl Into<PathBuf>) -> Result<Self> {
        let download_dir = download_dir.into();
        std::fs::create_dir_all(&download_dir)
            .with_context(|| format!("creating download dir {}", download_dir.display()))?;
        Ok(Self {
            download_dir,
            timeouts: FetchTimeouts::default(),
        })
    }

    pub fn with_timeouts(mut self, timeouts: FetchTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn report_path(&self, key: &ReportKey) -> PathBuf {
        self.download_dir.join(key.file_name())
    }

    /// Get the report for `key`, from disk if it was fetched before.
    ///
    /// An existing report never touches the browser. `Err` is reserved for
    /// problems outside the page itself (launching, file system).
    #[tracing::instrument(level = "info", skip(self, session), fields(report = %key))]
    pub async fn fetch<L: Launcher>(
        &self,
        session: &mut Session<L>,
        key: &ReportKey,
    ) -> Result<FetchOutcome> {
        let target = self.report_path(key);
        if target.exists() {
            info!(file = %key.file_name(), "already downloaded, skipping");
            return Ok(FetchOutcome::Success(target));
        }

        let page = session.page().await.context("starting browser session")?;

        let required = [
            (controls::COUNTRY, key.reporter.as_str()),
            (controls::PARTNER, key.partner.as_str()),
            (controls::TRADE_TYPE, key.trade_type.form_value()),
        ];
        for (control, value) in required {
            match self.select(&mut *page, control, value).await {
                DropdownOutcome::Selected => {}
                DropdownOutcome::ConnectionLost => return Ok(FetchOutcome::ConnectionFailure),
                DropdownOutcome::Failed => return Ok(FetchOutcome::TransientFailure),
            }
        }

        // HS 4-digit products over five periods; the page works without either.
        for (control, value) in [(controls::PRODUCT_LEVEL, "4"), (controls::TIME_PERIODS, "5")] {
            if self.select(&mut *page, control, value).await != DropdownOutcome::Selected {
                debug!(control, value, "optional selection failed, continuing");
            }
        }

        self.clear_stale_downloads().await?;

        match page
            .click_if_present(controls::EXPORT_EXCEL, self.timeouts.export_control)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(reporter = %key.reporter, "export button not found");
                return Ok(FetchOutcome::NoExportControl);
            }
            Err(e) if e.is_connection() => {
                error!(error = %e, "lost browser while exporting");
                return Ok(FetchOutcome::ConnectionFailure);
            }
            Err(e) => {
                error!(error = %e, "failed to click export");
                return Ok(FetchOutcome::TransientFailure);
            }
        }

        info!(partner = %key.partner, trade_type = %key.trade_type, "downloading report");
        match self.wait_for_download(&target).await? {
            Some(path) => {
                info!(file = %key.file_name(), "downloaded and renamed");
                Ok(FetchOutcome::Success(path))
            }
            None => {
                error!(timeout = ?self.timeouts.download, "download did not appear");
                Ok(FetchOutcome::TransientFailure)
            }
        }
    }

    async fn select<P: FormPage>(
        &self,
        page: &mut P,
        control: &str,
        value: &str,
    ) -> DropdownOutcome {
        select_dropdown_with_timeout(page, control, value, SELECT_ATTEMPTS, self.timeouts.ui).await
    }

    /// Leftover spreadsheets would otherwise be taken for the next download.
    async fn clear_stale_downloads(&self) -> Result<()> {
        for path in self.spreadsheets(true)? {
            warn!(file = %path.display(), "removing stale download");
            fs::remove_file(&path)
                .await
                .with_context(|| format!("removing {}", path.display()))?;
        }
        Ok(())
    }

    /// Spreadsheet files in the download directory; partial ones only if asked.
    fn spreadsheets(&self, include_partial: bool) -> Result<Vec<PathBuf>> {
        let pattern = format!("{}/*", glob::Pattern::escape(&self.download_dir.to_string_lossy()));
        let mut found = Vec::new();
        for entry in glob(&pattern).context("invalid download dir pattern")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cannot read download dir entry");
                    continue;
                }
            };
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = name.to_lowercase();
            let partial = name.ends_with(PARTIAL_SUFFIX);
            if name.ends_with(".xls") || (include_partial && partial) {
                found.push(path);
            }
        }
        Ok(found)
    }

    /// Poll until a finished `.xls` shows up, then move it to `target`.
    async fn wait_for_download(&self, target: &Path) -> Result<Option<PathBuf>> {
        let deadline = Instant::now() + self.timeouts.download;
        while Instant::now() < deadline {
            for path in self.spreadsheets(false)? {
                match fs::rename(&path, target).await {
                    Ok(()) => return Ok(Some(target.to_path_buf())),
                    Err(e) => error!(file = %path.display(), error = %e, "rename failed"),
                }
            }
            sleep(self.timeouts.poll).await;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::FakeLauncher;
    use crate::browser::PageError;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    fn quick() -> FetchTimeouts {
        FetchTimeouts {
            ui: Duration::from_millis(10),
            export_control: Duration::from_millis(10),
            download: Duration::from_millis(200),
            poll: Duration::from_millis(10),
        }
    }

    fn key() -> ReportKey {
        ReportKey::new("360", "156", TradeType::Export)
    }

    #[test]
    fn report_file_name() {
        assert_eq!(key().file_name(), "360_156_Export.html");
        assert_eq!(
            ReportKey::new("360", "842", TradeType::Import).file_name(),
            "360_842_Import.html"
        );
    }

    #[tokio::test]
    async fn existing_report_skips_browser() -> Result<()> {
        let dir = tempdir()?;
        let fetcher = ReportFetcher::new(dir.path())?.with_timeouts(quick());
        std::fs::write(dir.path().join("360_156_Export.html"), "<table></table>")?;

        let launcher = FakeLauncher::default();
        let script = launcher.script.clone();
        let mut session = Session::new(launcher, "https://example.test");

        let outcome = fetcher.fetch(&mut session, &key()).await?;
        assert_eq!(
            outcome,
            FetchOutcome::Success(dir.path().join("360_156_Export.html"))
        );
        assert_eq!(script.borrow().launches, 0);
        assert!(script.borrow().calls.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn downloads_and_renames() -> Result<()> {
        let dir = tempdir()?;
        let fetcher = ReportFetcher::new(dir.path())?.with_timeouts(quick());
        std::fs::write(dir.path().join("old_export.xls"), "stale")?;

        let launcher = FakeLauncher::default();
        {
            let mut s = launcher.script.borrow_mut();
            s.present.push(controls::EXPORT_EXCEL.into());
            s.downloads.push((dir.path().join("Trade_Map.xls"), b"<html>fresh</html>".to_vec()));
        }
        let script = launcher.script.clone();
        let mut session = Session::new(launcher, "https://example.test");

        let outcome = fetcher.fetch(&mut session, &key()).await?;
        let target = dir.path().join("360_156_Export.html");
        assert_eq!(outcome, FetchOutcome::Success(target.clone()));
        assert_eq!(std::fs::read_to_string(&target)?, "<html>fresh</html>");
        assert!(!dir.path().join("old_export.xls").exists());
        assert!(!dir.path().join("Trade_Map.xls").exists());

        let calls = script.borrow().calls.clone();
        assert_eq!(
            calls,
            vec![
                "open https://example.test".to_string(),
                format!("select {}=360", controls::COUNTRY),
                format!("select {}=156", controls::PARTNER),
                format!("select {}=E", controls::TRADE_TYPE),
                format!("select {}=4", controls::PRODUCT_LEVEL),
                format!("select {}=5", controls::TIME_PERIODS),
                format!("click {}", controls::EXPORT_EXCEL),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_export_button_is_its_own_outcome() -> Result<()> {
        let dir = tempdir()?;
        let fetcher = ReportFetcher::new(dir.path())?.with_timeouts(quick());
        let mut session = Session::new(FakeLauncher::default(), "https://example.test");

        let outcome = fetcher.fetch(&mut session, &key()).await?;
        assert_eq!(outcome, FetchOutcome::NoExportControl);
        Ok(())
    }

    #[tokio::test]
    async fn optional_selections_do_not_block() -> Result<()> {
        let dir = tempdir()?;
        let fetcher = ReportFetcher::new(dir.path())?.with_timeouts(quick());
        let launcher = FakeLauncher::default();
        {
            let mut s = launcher.script.borrow_mut();
            s.present.push(controls::EXPORT_EXCEL.into());
            s.downloads.push((dir.path().join("x.xls"), b"ok".to_vec()));
            s.select_errors.insert(
                controls::TIME_PERIODS.into(),
                (0..3).map(|_| PageError::Ui("no such element".into())).collect(),
            );
        }
        let mut session = Session::new(launcher, "https://example.test");

        let outcome = fetcher.fetch(&mut session, &key()).await?;
        assert!(matches!(outcome, FetchOutcome::Success(_)));
        Ok(())
    }

    #[tokio::test]
    async fn required_selection_failures_map_to_outcomes() -> Result<()> {
        let dir = tempdir()?;
        let fetcher = ReportFetcher::new(dir.path())?.with_timeouts(quick());

        let launcher = FakeLauncher::default();
        launcher.script.borrow_mut().select_errors.insert(
            controls::PARTNER.into(),
            VecDeque::from([PageError::classify("connection refused")]),
        );
        let mut session = Session::new(launcher, "https://example.test");
        assert_eq!(
            fetcher.fetch(&mut session, &key()).await?,
            FetchOutcome::ConnectionFailure
        );

        let launcher = FakeLauncher::default();
        launcher.script.borrow_mut().select_errors.insert(
            controls::TRADE_TYPE.into(),
            (0..3).map(|_| PageError::Ui("timeout".into())).collect(),
        );
        let mut session = Session::new(launcher, "https://example.test");
        assert_eq!(
            fetcher.fetch(&mut session, &key()).await?,
            FetchOutcome::TransientFailure
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_download_times_out() -> Result<()> {
        let dir = tempdir()?;
        let fetcher = ReportFetcher::new(dir.path())?.with_timeouts(quick());
        let launcher = FakeLauncher::default();
        {
            let mut s = launcher.script.borrow_mut();
            s.present.push(controls::EXPORT_EXCEL.into());
            s.downloads.push((dir.path().join("Trade_Map.xls.crdownload"), b"half".to_vec()));
        }
        let mut session = Session::new(launcher, "https://example.test");

        let outcome = fetcher.fetch(&mut session, &key()).await?;
        assert_eq!(outcome, FetchOutcome::TransientFailure);
        assert!(!dir.path().join("360_156_Export.html").exists());
        Ok(())
    }
}
