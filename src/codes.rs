// src/codes.rs

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use std::{collections::HashMap, io::Read, path::Path};
use tracing::{debug, info};

const ALPHA3_COLUMN: &str = "ISO-alpha3 Code";
const M49_COLUMN: &str = "M49 Code";

/// Two-way lookup between ISO alpha-3 codes and zero-padded M49 codes.
#[derive(Debug, Default, Clone)]
pub struct CodeMap {
    alpha_to_m49: HashMap<String, String>,
    m49_to_alpha: HashMap<String, String>,
}

impl CodeMap {
    /// Load the `;`-delimited reference file.
    #[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(&path)
            .with_context(|| format!("opening code reference {:?}", path.as_ref()))?;
        let map = Self::from_reader(file)?;
        info!(entries = map.len(), "loaded code reference");
        Ok(map)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .context("reading code reference header")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let (Some(alpha_idx), Some(m49_idx)) = (
            headers.iter().position(|h| h == ALPHA3_COLUMN),
            headers.iter().position(|h| h == M49_COLUMN),
        ) else {
            bail!(
                "required columns not found in code reference. Found columns: {}",
                headers.join(", ")
            );
        };

        let mut map = CodeMap::default();
        for (idx, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("code reference record {}", idx))?;
            let alpha = record.get(alpha_idx).unwrap_or("").trim();
            let Some(m49) = record.get(m49_idx).and_then(normalize_m49) else {
                debug!(row = idx, alpha, "no M49 code, skipping");
                continue;
            };
            map.insert(alpha, &m49);
        }
        Ok(map)
    }

    fn insert(&mut self, alpha: &str, m49: &str) {
        self.alpha_to_m49.insert(alpha.to_string(), m49.to_string());
        self.m49_to_alpha
            .entry(m49.to_string())
            .or_insert_with(|| alpha.to_string());
    }

    pub fn m49_for(&self, alpha3: &str) -> Option<&str> {
        self.alpha_to_m49.get(alpha3).map(String::as_str)
    }

    /// Reverse lookup; the first alpha-3 registered for a code wins.
    pub fn alpha3_for(&self, m49: &str) -> Option<&str> {
        self.m49_to_alpha.get(m49).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.alpha_to_m49.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alpha_to_m49.is_empty()
    }
}

/// "4", "4.0" and " 004 " all become "004".
fn normalize_m49(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let n = raw.parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.0)?;
    Some(format!("{:03}", n.trunc() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "Country or Area ; M49 Code ;ISO-alpha3 Code\n\
Afghanistan;4;AFG\n\
Indonesia;360.0;IDN\n\
Antarctica;;ATA\n\
Indonesia (alt);360;IDX\n";

    #[test]
    fn builds_both_directions() {
        let map = CodeMap::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(map.m49_for("AFG"), Some("004"));
        assert_eq!(map.m49_for("IDN"), Some("360"));
        assert_eq!(map.alpha3_for("004"), Some("AFG"));
        assert_eq!(map.alpha3_for("360"), Some("IDN"));
        assert_eq!(map.m49_for("ATA"), None);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn missing_columns_is_an_error() {
        let err = CodeMap::from_reader("Name;Code\nFoo;1\n".as_bytes()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Found columns: Name, Code"), "{msg}");
    }

    #[test]
    fn loads_from_disk() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(SAMPLE.as_bytes())?;
        let map = CodeMap::load(tmp.path())?;
        assert_eq!(map.m49_for("AFG"), Some("004"));
        Ok(())
    }
}
