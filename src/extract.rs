// src/extract.rs

use crate::config::TradeType;
use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::{collections::HashMap, path::Path};
use tracing::{debug, error, info, warn};

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("table selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector"));

/// Bilateral value columns, e.g. "Imports from China Value in 2019".
static FLOW_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(exports to|imports from)").expect("flow regex"));
static VALUE_COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)value in").expect("value regex"));

/// One value cell of a report, tagged with what it is about.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRow {
    pub reporter_alpha3: String,
    pub partner_alpha3: String,
    pub year: i32,
    pub hs_code: String,
    pub value: f64,
    pub trade_type: TradeType,
}

/// Who a report is about; copied onto every row it yields.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub reporter_alpha3: String,
    pub partner_alpha3: String,
    pub trade_type: TradeType,
}

/// A table flattened into header names and text cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Read a downloaded report and pull out its value cells.
/// Anything unreadable is logged and yields no rows.
#[tracing::instrument(level = "info", skip(path, ctx), fields(path = %path.as_ref().display()))]
pub fn extract_file<P: AsRef<Path>>(path: P, ctx: &ReportContext) -> Vec<ExtractedRow> {
    let html = match read_report(path.as_ref()) {
        Ok(html) => html,
        Err(e) => {
            error!(error = %e, "failed to read report");
            return Vec::new();
        }
    };
    let rows = extract_rows(&html, ctx);
    info!(rows = rows.len(), "extracted rows");
    rows
}

/// The export is HTML saved as `.xls`; older ones are not always valid UTF-8.
fn read_report(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

pub fn extract_rows(html: &str, ctx: &ReportContext) -> Vec<ExtractedRow> {
    let Some(table) = find_data_table(html) else {
        error!("no valid data table found");
        return Vec::new();
    };
    info!(rows = table.rows.len(), "data table found");
    rows_from_table(&table, ctx)
}

/// The first table whose first row mentions "Product code", with its
/// two header rows merged into column names.
pub fn find_data_table(html: &str) -> Option<DataTable> {
    let document = Html::parse_document(html);
    let tables: Vec<ElementRef> = document.select(&TABLE).collect();
    info!(tables = tables.len(), "parsed report");

    for (idx, table) in tables.into_iter().enumerate() {
        let grid = table_grid(table);
        debug!(idx, rows = grid.len(), "table shape");
        if grid.len() < 2 {
            continue;
        }
        let is_data = grid[0]
            .iter()
            .any(|cell| cell.to_lowercase().contains("product code"));
        if !is_data {
            continue;
        }
        info!(idx, "data table detected");

        let width = grid.iter().map(Vec::len).max().unwrap_or(0);
        let headers = (0..width)
            .map(|i| {
                let top = grid[0].get(i).map(String::as_str).unwrap_or("").trim();
                let bottom = grid[1].get(i).map(String::as_str).unwrap_or("").trim();
                format!("{} {}", top, bottom).trim().to_string()
            })
            .collect();
        let rows = grid.into_iter().skip(2).collect();
        return Some(DataTable { headers, rows });
    }
    None
}

/// Cell texts of `table`'s own rows, with row and column spans filled in.
fn table_grid(table: ElementRef) -> Vec<Vec<String>> {
    let mut grid: Vec<Vec<String>> = Vec::new();
    // (row, col) -> text carried down by a rowspan
    let mut carried: HashMap<(usize, usize), String> = HashMap::new();

    let own_rows = table.select(&ROW).filter(|row| {
        row.ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "table")
            .is_some_and(|t| t.id() == table.id())
    });

    for (r, row) in own_rows.enumerate() {
        let mut cells: Vec<String> = Vec::new();
        let mut col = 0;
        let own_cells = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| matches!(c.value().name(), "td" | "th"));

        for cell in own_cells {
            while let Some(text) = carried.remove(&(r, col)) {
                cells.push(text);
                col += 1;
            }
            let text = cell_text(cell);
            let colspan = span(cell, "colspan");
            let rowspan = span(cell, "rowspan");
            for _ in 0..colspan {
                for below in 1..rowspan {
                    carried.insert((r + below, col), text.clone());
                }
                cells.push(text.clone());
                col += 1;
            }
        }
        // rowspans reaching past a short row, in column order, gaps left blank
        let mut rest: Vec<(usize, String)> = carried
            .iter()
            .filter(|((row, _), _)| *row == r)
            .map(|(&(_, c), text)| (c, text.clone()))
            .collect();
        carried.retain(|(row, _), _| *row != r);
        rest.sort_by_key(|(c, _)| *c);
        for (c, text) in rest {
            if c >= cells.len() {
                cells.resize(c, String::new());
                cells.push(text);
            }
        }
        grid.push(cells);
    }
    grid
}

fn span(cell: ElementRef, attr: &str) -> usize {
    cell.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
        .min(1000)
}

fn cell_text(cell: ElementRef) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip the leading `'`, `.` and spaces the export puts in front of codes.
/// `None` unless what is left is a run of digits.
pub fn clean_product_code(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_start_matches(|c| matches!(c, '\'' | '.' | ' '))
        .trim();
    (!cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_digit()))
        .then(|| cleaned.to_string())
}

/// Bilateral "value in" columns, leaving out the world totals.
pub fn is_value_column(name: &str) -> bool {
    FLOW_COLUMN.is_match(name)
        && VALUE_COLUMN.is_match(name)
        && !name.to_lowercase().contains("world")
}

fn year_of(column: &str) -> Option<i32> {
    let digits: String = column.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `None` for blanks and zeroes, `Err` for anything that is not a number.
fn parse_value(raw: &str) -> Result<Option<f64>> {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.trim();
    if matches!(cleaned.to_lowercase().as_str(), "" | "null" | "nan" | "0") {
        return Ok(None);
    }
    let value: f64 = cleaned
        .parse()
        .with_context(|| format!("not a number: {:?}", raw))?;
    if !value.is_finite() {
        bail!("not a finite number: {:?}", raw);
    }
    Ok((value != 0.0).then_some(value))
}

pub fn rows_from_table(table: &DataTable, ctx: &ReportContext) -> Vec<ExtractedRow> {
    let Some(product_col) = table
        .headers
        .iter()
        .position(|h| h.to_lowercase().contains("product code"))
    else {
        error!("product code column not found");
        return Vec::new();
    };

    let value_cols: Vec<(usize, &str, i32)> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, name)| is_value_column(name))
        .filter_map(|(i, name)| match year_of(name) {
            Some(year) => Some((i, name.as_str(), year)),
            None => {
                warn!(column = %name, "no year in column name, skipping column");
                None
            }
        })
        .collect();

    let mut out = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let raw_code = row.get(product_col).map(String::as_str).unwrap_or("");
        let Some(hs_code) = clean_product_code(raw_code) else {
            debug!(row = i, raw = raw_code, "skipped non-numeric product code");
            continue;
        };

        for &(col, name, year) in &value_cols {
            let raw = row.get(col).map(String::as_str).unwrap_or("");
            match parse_value(raw) {
                Ok(Some(value)) => out.push(ExtractedRow {
                    reporter_alpha3: ctx.reporter_alpha3.clone(),
                    partner_alpha3: ctx.partner_alpha3.clone(),
                    year,
                    hs_code: hs_code.clone(),
                    value,
                    trade_type: ctx.trade_type,
                }),
                Ok(None) => {}
                Err(e) => error!(row = i, column = name, error = %e, "failed to convert value"),
            }
        }
    }
    out
}
