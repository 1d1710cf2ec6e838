use serde::{Deserialize, Serialize};

use super::{Row, ToolError};

/// Descriptive statistics for one numeric column. All fields are rounded to
/// four decimal places; `std` is the population standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// One entry of a top-N value frequency listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Resolve a requested column name against the declared columns: exact match
/// first, then a case/whitespace-insensitive comparison. Unresolved names fall
/// through as the literal request; downstream callers treat an empty numeric
/// set as "column not found or non-numeric".
pub fn resolve_column(columns: &[String], requested: &str) -> String {
    if columns.iter().any(|col| col == requested) {
        return requested.to_string();
    }

    let wanted = normalize(requested);
    columns
        .iter()
        .find(|col| normalize(col) == wanted)
        .cloned()
        .unwrap_or_else(|| requested.to_string())
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Parse one cell as a number; blanks and non-numeric text are excluded from
/// statistics rather than aborting the computation.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Median with the usual parity rule: mean of the two middle elements for an
/// even count, the exact middle element otherwise. `values` must be sorted.
fn median_of_sorted(values: &[f64]) -> f64 {
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Rounded descriptive statistics over a bag of parsed numbers. Shared by the
/// CSV column path and the video-field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

pub fn numeric_summary(mut values: Vec<f64>) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.partial_cmp(b).expect("finite values compare totally"));

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

    Some(NumericSummary {
        count,
        mean: round4(mean),
        median: round4(median_of_sorted(&values)),
        std: round4(variance.sqrt()),
        min: round4(values[0]),
        max: round4(values[count - 1]),
    })
}

/// Descriptive statistics over one column of a row set.
pub fn column_stats(
    rows: &[Row],
    columns: &[String],
    requested: &str,
) -> Result<ColumnStats, ToolError> {
    let column = resolve_column(columns, requested);

    let values: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(&column))
        .filter_map(|cell| parse_numeric(cell))
        .collect();

    let summary = numeric_summary(values).ok_or_else(|| no_numeric_data(requested, columns))?;

    Ok(ColumnStats {
        column,
        count: summary.count,
        mean: summary.mean,
        median: summary.median,
        std: summary.std,
        min: summary.min,
        max: summary.max,
    })
}

/// Top-N value frequencies for one column, ordered by descending count with
/// ties left in encounter order (stable sort).
pub fn value_counts(
    rows: &[Row],
    columns: &[String],
    requested: &str,
    top_n: usize,
) -> Result<Vec<ValueCount>, ToolError> {
    let column = resolve_column(columns, requested);

    let mut order: Vec<String> = Vec::new();
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for row in rows {
        let Some(value) = row.get(&column) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if !counts.contains_key(value) {
            order.push(value.to_string());
        }
        *counts.entry(value.to_string()).or_insert(0) += 1;
    }

    if order.is_empty() {
        return Err(no_numeric_data(requested, columns));
    }

    let mut entries: Vec<ValueCount> = order
        .into_iter()
        .map(|value| {
            let count = counts[&value];
            ValueCount { value, count }
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries.truncate(top_n);

    Ok(entries)
}

fn no_numeric_data(requested: &str, columns: &[String]) -> ToolError {
    ToolError::new(format!(
        "Column '{}' not found or has no usable values. Available columns: {}",
        requested,
        columns.join(", ")
    ))
}
