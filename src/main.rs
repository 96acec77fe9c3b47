use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use tradescrape::{
    browser::{ChromeLauncher, Session},
    codes::CodeMap,
    config::{Config, DbSettings},
    fetch::ReportFetcher,
    run::{Runner, Sinks},
    sink::DatabaseSink,
};

#[derive(Parser)]
#[command(name = "tradescrape")]
#[command(version = "0.1.0")]
#[command(about = "Bulk download of TradeMap bilateral trade reports into the tbtrade table")]
struct Cli {
    /// Run configuration (JSON, or YAML by extension)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// `;`-separated ISO alpha-3 / M49 reference file
    #[arg(long, default_value = "Cleaned_Alpha3-M49_Code_Reference.csv")]
    codes: PathBuf,

    /// Where reports are downloaded and cached
    #[arg(long, default_value = "downloads")]
    download_dir: PathBuf,

    /// Where SQL scripts are written when `export_to_sql` is on
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, default_value = "http://localhost:9515")]
    webdriver_url: String,

    /// The bilateral trade form
    #[arg(long, default_value = "https://www.trademap.org/Bilateral_TS.aspx")]
    base_url: String,

    /// Database settings (`DB_*` variables), read when `insert_to_database` is on
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cli = Cli::parse();
    info!(config = %cli.config.display(), "startup");

    // ─── 2) load inputs ──────────────────────────────────────────────
    let config = Config::load(&cli.config)?;
    let codes = CodeMap::load(&cli.codes)?;

    let database = if config.insert_to_database {
        let settings = DbSettings::from_env(&cli.env_file)?;
        info!(host = %settings.host, table = %settings.table, "database sink enabled");
        Some(DatabaseSink::new(settings))
    } else {
        None
    };
    let script_dir = config.export_to_sql.then(|| cli.output_dir.clone());
    if database.is_none() && script_dir.is_none() {
        warn!("neither export_to_sql nor insert_to_database is set; records are only counted");
    }

    // ─── 3) browser + fetcher ────────────────────────────────────────
    let fetcher = ReportFetcher::new(&cli.download_dir)?;
    let launcher = ChromeLauncher::new(&cli.webdriver_url, fetcher.download_dir(), config.headless)?;
    let mut session = Session::new(launcher, &cli.base_url);

    // ─── 4) run ──────────────────────────────────────────────────────
    let summary = Runner::new(
        &config,
        &codes,
        &fetcher,
        Sinks {
            script_dir,
            database,
        },
    )
    .run(&mut session)
    .await;

    info!(
        parsed = summary.parsed,
        no_data = summary.no_data,
        failed = summary.failed,
        records = summary.records.len(),
        "all done"
    );
    Ok(())
}
