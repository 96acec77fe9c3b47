// src/record.rs

use crate::config::TradeType;
use crate::extract::ExtractedRow;

/// Column order of the `tbtrade` table.
pub const COLUMNS: [&str; 16] = [
    "Kode_Alpha3_Reporter",
    "Provinsi_Reporter",
    "Kota_Reporter",
    "Kode_Alpha3_Partner",
    "Provinsi_Partner",
    "Kota_Partner",
    "Bulan",
    "Tahun",
    "HSCode",
    "ID_Sektor",
    "Vol",
    "Satuan",
    "Tarif",
    "Nilai",
    "Kode_Sumber",
    "Status",
];

/// Source code stamped on every row this scraper produces.
pub const SOURCE_CODE: &str = "5";

/// One row of the trade table. Locality, month, sector and unit are never
/// known and stay NULL; volume and tariff are always 0.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub reporter_alpha3: String,
    pub partner_alpha3: String,
    pub year: i32,
    pub hs_code: String,
    pub value: f64,
    pub status: TradeType,
}

impl From<ExtractedRow> for TradeRecord {
    fn from(row: ExtractedRow) -> Self {
        Self {
            reporter_alpha3: row.reporter_alpha3,
            partner_alpha3: row.partner_alpha3,
            year: row.year,
            hs_code: row.hs_code,
            value: row.value,
            status: row.trade_type,
        }
    }
}

impl TradeRecord {
    /// The record as a literal `VALUES` tuple.
    pub fn values_tuple(&self) -> String {
        format!(
            "({}, NULL, NULL, {}, NULL, NULL, NULL, {}, {}, NULL, 0, NULL, 0, {}, {}, {})",
            sql_str(&self.reporter_alpha3),
            sql_str(&self.partner_alpha3),
            self.year,
            sql_str(&self.hs_code),
            sql_number(self.value),
            sql_str(SOURCE_CODE),
            sql_str(self.status.as_str()),
        )
    }
}

/// Backtick-quoted, comma separated column list.
pub fn column_list() -> String {
    COLUMNS
        .iter()
        .map(|c| format!("`{}`", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sql_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Plain decimal, always with a fractional part: 1234 -> "1234.0".
fn sql_number(v: f64) -> String {
    let s = v.to_string();
    if s.contains('.') || !v.is_finite() {
        s
    } else {
        format!("{}.0", s)
    }
}
