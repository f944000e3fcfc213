//! Built-in algorithms over tabular (CSV) assets.
//!
//! Each returns a short textual summary; none of them echo cell values other
//! than aggregates and header names.

use crate::compute::ComputeExecutor;

pub const DATASET_SUMMARY: &str = "dataset_summary";
pub const ROW_COUNT: &str = "row_count";
pub const COLUMN_STATS: &str = "column_stats";

pub fn register_builtins(executor: &mut ComputeExecutor) {
    executor.register(DATASET_SUMMARY, dataset_summary);
    executor.register(ROW_COUNT, row_count);
    executor.register(COLUMN_STATS, column_stats);
}

struct Table<'a> {
    headers: Vec<&'a str>,
    rows: Vec<Vec<&'a str>>,
}

fn parse_table(bytes: &[u8]) -> Result<Table<'_>, String> {
    let text = std::str::from_utf8(bytes).map_err(|_| "asset is not UTF-8 text".to_string())?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let headers: Vec<&str> = lines
        .next()
        .ok_or_else(|| "asset is empty".to_string())?
        .split(',')
        .map(str::trim)
        .collect();
    let rows = lines
        .map(|l| l.split(',').map(str::trim).collect())
        .collect();
    Ok(Table { headers, rows })
}

/// Rows, columns and header names.
pub fn dataset_summary(bytes: &[u8]) -> Result<String, String> {
    let table = parse_table(bytes)?;
    let ragged = table
        .rows
        .iter()
        .filter(|r| r.len() != table.headers.len())
        .count();
    let mut summary = format!(
        "{} rows x {} columns ({})",
        table.rows.len(),
        table.headers.len(),
        table.headers.join(", ")
    );
    if ragged > 0 {
        summary.push_str(&format!("; {} rows with a mismatched column count", ragged));
    }
    Ok(summary)
}

/// Number of data rows (header excluded).
pub fn row_count(bytes: &[u8]) -> Result<String, String> {
    Ok(parse_table(bytes)?.rows.len().to_string())
}

/// count/min/max/mean for every column whose values are all numeric.
pub fn column_stats(bytes: &[u8]) -> Result<String, String> {
    let table = parse_table(bytes)?;
    if table.rows.is_empty() {
        return Err("dataset has no rows".to_string());
    }

    let mut lines = Vec::new();
    for (idx, name) in table.headers.iter().enumerate() {
        let values: Option<Vec<f64>> = table
            .rows
            .iter()
            .map(|r| r.get(idx).and_then(|v| v.parse::<f64>().ok()))
            .collect();
        let Some(values) = values else { continue };

        let count = values.len();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / count as f64;
        lines.push(format!(
            "{}: count={} min={} max={} mean={:.2}",
            name, count, min, max, mean
        ));
    }

    if lines.is_empty() {
        return Err("dataset has no numeric columns".to_string());
    }
    Ok(lines.join("\n"))
}
