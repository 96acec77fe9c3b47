// src/sink/database.rs

use crate::config::DbSettings;
use crate::record::{column_list, TradeRecord, SOURCE_CODE};
use anyhow::{anyhow, Context, Result};
use sqlx::{
    mysql::{MySql, MySqlConnectOptions, MySqlConnection},
    Connection, QueryBuilder,
};
use std::{future::Future, time::Duration};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

pub const INSERT_ATTEMPTS: u32 = 3;
pub const INSERT_RETRY_DELAY: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Rows per INSERT statement; keeps the bind count under MySQL's 65535.
const ROWS_PER_STATEMENT: usize = 1000;

/// Inserts record batches into the configured MySQL table.
#[derive(Debug, Clone)]
pub struct DatabaseSink {
    settings: DbSettings,
    attempts: u32,
    retry_delay: Duration,
}

impl DatabaseSink {
    pub fn new(settings: DbSettings) -> Self {
        Self {
            settings,
            attempts: INSERT_ATTEMPTS,
            retry_delay: INSERT_RETRY_DELAY,
        }
    }

    /// Insert the whole batch in one transaction, retrying the batch on any
    /// failure. Returns whether it made it; failures are logged, not raised.
    pub async fn insert(&self, records: &[TradeRecord]) -> bool {
        if records.is_empty() {
            return true;
        }
        let outcome = retry_fixed(self.attempts, self.retry_delay, |attempt| async move {
            self.insert_once(records).await.map_err(|e| {
                error!(attempt, attempts = self.attempts, error = %e, "database insert failed");
                e
            })
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(rows = records.len(), table = %self.settings.table, "inserted rows into database");
                true
            }
            Err(_) => {
                error!(attempts = self.attempts, "database insert abandoned");
                false
            }
        }
    }

    async fn insert_once(&self, records: &[TradeRecord]) -> Result<()> {
        let s = &self.settings;
        let options = MySqlConnectOptions::new()
            .host(&s.host)
            .username(&s.username)
            .password(&s.password)
            .database(&s.database)
            .charset("utf8mb4");

        let mut conn = timeout(CONNECT_TIMEOUT, MySqlConnection::connect_with(&options))
            .await
            .map_err(|_| anyhow!("connecting to {} timed out", s.host))?
            .with_context(|| format!("connecting to {}", s.host))?;

        let result = async {
            let mut tx = conn.begin().await?;
            sqlx::query("SET FOREIGN_KEY_CHECKS = 0")
                .execute(&mut *tx)
                .await?;
            for chunk in records.chunks(ROWS_PER_STATEMENT) {
                insert_query(&s.table, chunk)
                    .build()
                    .execute(&mut *tx)
                    .await
                    .context("executing insert")?;
            }
            sqlx::query("SET FOREIGN_KEY_CHECKS = 1")
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = conn.close().await {
            warn!(error = %e, "closing database connection");
        }
        result
    }
}

/// Multi-row INSERT for `records` with every value bound.
pub fn insert_query<'a>(table: &str, records: &'a [TradeRecord]) -> QueryBuilder<'a, MySql> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO `{}` ({}) ",
        table.replace('`', "``"),
        column_list()
    ));
    qb.push_values(records, |mut row, r| {
        row.push_bind(r.reporter_alpha3.as_str())
            .push_bind(None::<String>)
            .push_bind(None::<String>)
            .push_bind(r.partner_alpha3.as_str())
            .push_bind(None::<String>)
            .push_bind(None::<String>)
            .push_bind(None::<i32>)
            .push_bind(r.year)
            .push_bind(r.hs_code.as_str())
            .push_bind(None::<i32>)
            .push_bind(0_i32)
            .push_bind(None::<String>)
            .push_bind(0_i32)
            .push_bind(r.value)
            .push_bind(SOURCE_CODE)
            .push_bind(r.status.as_str());
    });
    qb
}

/// Run `op` up to `attempts` times with a fixed pause between tries.
pub async fn retry_fixed<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(_) if attempt < attempts => {
                info!(attempt, attempts, "retrying");
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
