// src/sink/file.rs

use crate::config::TradeType;
use crate::record::{column_list, TradeRecord};
use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::info;

/// Table name used inside exported scripts.
const SCRIPT_TABLE: &str = "tbtrade";

/// `tbtrade_{reporter}_{tradeType}.sql` under `dir`.
pub fn script_path(dir: &Path, reporter: &str, trade_type: TradeType) -> PathBuf {
    dir.join(format!("tbtrade_{}_{}.sql", reporter, trade_type))
}

/// Write `records` as one multi-row INSERT, wrapped in the charset and
/// foreign key check statements. Does nothing for an empty slice.
pub fn write_sql_script(path: &Path, records: &[TradeRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output dir {}", parent.display()))?;
    }

    // write to a temp name, rename once complete
    let tmp = path.with_extension("sql.tmp");
    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut out = BufWriter::new(file);
    render_script(&mut out, records).with_context(|| format!("writing {}", tmp.display()))?;
    out.flush()?;
    drop(out);
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;

    info!(path = %path.display(), rows = records.len(), "exported SQL script");
    Ok(())
}

fn render_script<W: Write>(out: &mut W, records: &[TradeRecord]) -> std::io::Result<()> {
    out.write_all(b"SET NAMES utf8mb4;\nSET FOREIGN_KEY_CHECKS = 0;\n")?;
    writeln!(
        out,
        "INSERT INTO `{}` ({}) VALUES",
        SCRIPT_TABLE,
        column_list()
    )?;
    let last = records.len() - 1;
    for (i, record) in records.iter().enumerate() {
        let end = if i < last { "," } else { ";" };
        writeln!(out, "{}{}", record.values_tuple(), end)?;
    }
    out.write_all(b"SET FOREIGN_KEY_CHECKS = 1;\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(hs: &str, value: f64) -> TradeRecord {
        TradeRecord {
            reporter_alpha3: "IDN".into(),
            partner_alpha3: "CHN".into(),
            year: 2020,
            hs_code: hs.into(),
            value,
            status: TradeType::Import,
        }
    }

    #[test]
    fn script_layout() -> Result<()> {
        let dir = tempdir()?;
        let path = script_path(dir.path(), "360", TradeType::Import);
        assert!(path.ends_with("tbtrade_360_Import.sql"));

        write_sql_script(&path, &[record("0101", 1.5), record("0201", 2.0)])?;
        let text = fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "SET NAMES utf8mb4;");
        assert_eq!(lines[1], "SET FOREIGN_KEY_CHECKS = 0;");
        assert!(lines[2].starts_with("INSERT INTO `tbtrade` (`Kode_Alpha3_Reporter`"));
        assert!(lines[2].ends_with("`Status`) VALUES"));
        assert!(lines[3].contains("'0101'") && lines[3].ends_with("'Import'),"));
        assert!(lines[4].contains("'0201'") && lines[4].ends_with("'Import');"));
        assert_eq!(lines[5], "SET FOREIGN_KEY_CHECKS = 1;");
        assert_eq!(lines.len(), 6);
        assert!(!dir.path().join("tbtrade_360_Import.sql.tmp").exists());
        Ok(())
    }

    #[test]
    fn empty_batch_writes_nothing() -> Result<()> {
        let dir = tempdir()?;
        let path = script_path(dir.path(), "360", TradeType::Export);
        write_sql_script(&path, &[])?;
        assert!(!path.exists());
        Ok(())
    }
}
