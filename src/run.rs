// src/run.rs

use crate::browser::{Launcher, Session};
use crate::codes::CodeMap;
use crate::config::{Config, TradeType};
use crate::extract::{extract_file, ReportContext};
use crate::fetch::{FetchOutcome, ReportFetcher, ReportKey};
use crate::navigate::{controls, select_dropdown, DropdownOutcome};
use crate::record::TradeRecord;
use crate::sink::{script_path, write_sql_script, DatabaseSink};
use std::{collections::BTreeMap, path::PathBuf};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// Attempts at reselecting the reporter after a failed unit.
const RESELECT_ATTEMPTS: u32 = 5;

/// Where finished reporters go. Either, both or neither may be set.
#[derive(Debug, Default)]
pub struct Sinks {
    /// Directory for `tbtrade_*.sql` scripts.
    pub script_dir: Option<PathBuf>,
    pub database: Option<DatabaseSink>,
}

/// How one (reporter, partner, trade type) ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitState {
    Parsed(Vec<TradeRecord>),
    NoData,
    Failed,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub parsed: usize,
    pub no_data: usize,
    pub failed: usize,
    pub records: Vec<TradeRecord>,
}

impl RunSummary {
    /// Every record as a literal `VALUES` tuple, in collection order.
    pub fn statements(&self) -> Vec<String> {
        self.records.iter().map(TradeRecord::values_tuple).collect()
    }
}

/// Walks reporters × partners × trade types over one browser session.
pub struct Runner<'a> {
    config: &'a Config,
    codes: &'a CodeMap,
    fetcher: &'a ReportFetcher,
    sinks: Sinks,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a Config,
        codes: &'a CodeMap,
        fetcher: &'a ReportFetcher,
        sinks: Sinks,
    ) -> Self {
        Self {
            config,
            codes,
            fetcher,
            sinks,
        }
    }

    pub async fn run<L: Launcher>(&self, session: &mut Session<L>) -> RunSummary {
        let deadline = self.config.run_deadline().map(|d| Instant::now() + d);
        let mut summary = RunSummary::default();

        for reporter in &self.config.reporter_codes {
            let reporter_alpha3 = self.alpha3(reporter);
            info!(reporter = %reporter, alpha3 = %reporter_alpha3, "processing reporter");
            let mut pending: Vec<TradeRecord> = Vec::new();

            for partner in &self.config.partner_codes {
                if partner == reporter {
                    info!(reporter = %reporter, "skipping reporter as its own partner");
                    continue;
                }
                let partner_alpha3 = self.alpha3(partner);
                for &trade_type in &self.config.trade_types {
                    let key = ReportKey::new(reporter.as_str(), partner.as_str(), trade_type);
                    let ctx = ReportContext {
                        reporter_alpha3: reporter_alpha3.clone(),
                        partner_alpha3: partner_alpha3.clone(),
                        trade_type,
                    };
                    match self.run_unit(session, &key, &ctx, deadline).await {
                        UnitState::Parsed(records) => {
                            summary.parsed += 1;
                            pending.extend(records);
                        }
                        UnitState::NoData => summary.no_data += 1,
                        UnitState::Failed => summary.failed += 1,
                    }
                }
            }

            self.flush(reporter, &pending).await;
            summary.records.extend(pending);
            session.quit().await;
        }

        info!(
            parsed = summary.parsed,
            no_data = summary.no_data,
            failed = summary.failed,
            records = summary.records.len(),
            launches = session.launches(),
            "run finished"
        );
        summary
    }

    /// Fetch and parse one report, restarting the session as needed.
    async fn run_unit<L: Launcher>(
        &self,
        session: &mut Session<L>,
        key: &ReportKey,
        ctx: &ReportContext,
        deadline: Option<Instant>,
    ) -> UnitState {
        let max_attempts = self.config.max_attempts;
        for attempt in 1..=max_attempts {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(report = %key, "run deadline passed, abandoning");
                return UnitState::Failed;
            }

            match self.fetcher.fetch(session, key).await {
                Ok(FetchOutcome::Success(path)) => {
                    let records = extract_file(&path, ctx)
                        .into_iter()
                        .map(TradeRecord::from)
                        .collect::<Vec<_>>();
                    info!(report = %key, records = records.len(), "parsed report");
                    return UnitState::Parsed(records);
                }
                Ok(FetchOutcome::NoExportControl) => {
                    warn!(report = %key, "no export available, skipping");
                    return UnitState::NoData;
                }
                Ok(outcome) => {
                    warn!(
                        report = %key, attempt, max_attempts, ?outcome,
                        "fetch failed, restarting browser"
                    );
                    session.restart().await;
                }
                Err(e) => {
                    error!(
                        report = %key, attempt, max_attempts, error = %e,
                        "fetch errored, restarting browser"
                    );
                    session.restart().await;
                    if !self.reselect_reporter(session, &key.reporter).await {
                        error!(report = %key, "could not reselect reporter, abandoning");
                        return UnitState::Failed;
                    }
                    sleep(self.config.retry_delay()).await;
                }
            }
        }
        error!(report = %key, max_attempts, "giving up after max attempts");
        UnitState::Failed
    }

    async fn reselect_reporter<L: Launcher>(
        &self,
        session: &mut Session<L>,
        reporter: &str,
    ) -> bool {
        let page = match session.page().await {
            Ok(page) => page,
            Err(e) => {
                error!(error = %e, "browser unavailable");
                return false;
            }
        };
        select_dropdown(page, controls::COUNTRY, reporter, RESELECT_ATTEMPTS).await
            == DropdownOutcome::Selected
    }

    /// Hand a finished reporter's records to the configured sinks.
    async fn flush(&self, reporter: &str, records: &[TradeRecord]) {
        if records.is_empty() {
            info!(reporter = %reporter, "nothing to store");
            return;
        }

        if let Some(dir) = &self.sinks.script_dir {
            let mut by_type: BTreeMap<TradeType, Vec<TradeRecord>> = BTreeMap::new();
            for r in records {
                by_type.entry(r.status).or_default().push(r.clone());
            }
            for (trade_type, batch) in by_type {
                let path = script_path(dir, reporter, trade_type);
                if let Err(e) = write_sql_script(&path, &batch) {
                    error!(path = %path.display(), error = %e, "failed to write SQL script");
                }
            }
        }

        if let Some(db) = &self.sinks.database {
            db.insert(records).await;
        }
    }

    /// Alpha-3 for an M49 code, or the code itself when unknown.
    fn alpha3(&self, m49: &str) -> String {
        match self.codes.alpha3_for(m49) {
            Some(a) => a.to_string(),
            None => {
                warn!(code = %m49, "no alpha-3 code found, using numeric code");
                m49.to_string()
            }
        }
    }
}
