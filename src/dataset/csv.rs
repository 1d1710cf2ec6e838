use tracing::debug;

use super::stats::{parse_numeric, round4};
use super::tabular::{escape_cell, parse, Row};

/// Column-name patterns worth keeping when projecting a dataset down to a
/// context-sized CSV. Matching is a lowercase substring test against the
/// declared column name; header order is preserved.
const SLIM_PATTERNS: &[&str] = &[
    "text",
    "lang",
    "type",
    "view",
    "reply",
    "retweet",
    "quote",
    "favorite",
    "timestamp",
    "engagement",
];

/// Knobs for the per-turn dataset summary. The numeric-detection threshold is
/// a heuristic, kept configurable rather than baked in.
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    /// A column counts as numeric when at least this share of its non-empty
    /// values parse as numbers.
    pub numeric_threshold: f64,
    /// How many values to list for a categorical column.
    pub top_values: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            numeric_threshold: 0.8,
            top_values: 5,
        }
    }
}

/// A loaded tabular dataset. Column order is header order and only ever grows
/// (enrichment appends, nothing removes or reorders).
#[derive(Debug, Clone, Default)]
pub struct CsvDataset {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl CsvDataset {
    pub const ENGAGEMENT_COLUMN: &'static str = "engagement";

    pub fn from_text(text: &str) -> Self {
        let (columns, rows) = parse(text);
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.rows.is_empty()
    }

    /// First column whose lowercase name contains the needle.
    pub fn find_column(&self, needle: &str) -> Option<&String> {
        self.columns
            .iter()
            .find(|col| col.to_lowercase().contains(needle))
    }

    /// Append an engagement column (favorite-count / view-count) once per
    /// dataset. A second call is a no-op because the column already exists,
    /// as is any call where either source column cannot be found.
    pub fn enrich_engagement(&mut self) {
        if self
            .columns
            .iter()
            .any(|col| col == Self::ENGAGEMENT_COLUMN)
        {
            return;
        }

        let favorite_col = match self.find_column("favorite") {
            Some(col) => col.clone(),
            None => return,
        };
        let view_col = match self.find_column("view") {
            Some(col) => col.clone(),
            None => return,
        };

        for row in &mut self.rows {
            let favorites = row.get(&favorite_col).and_then(|v| parse_numeric(v));
            let views = row.get(&view_col).and_then(|v| parse_numeric(v));

            let value = match (favorites, views) {
                (Some(f), Some(v)) if f > 0.0 && v > 0.0 => (f / v).to_string(),
                _ => String::new(),
            };
            row.insert(Self::ENGAGEMENT_COLUMN.to_string(), value);
        }

        self.columns.push(Self::ENGAGEMENT_COLUMN.to_string());
        debug!(rows = self.rows.len(), "Engagement column appended");
    }

    /// Reduced-column CSV rendering sized for conversational context. Keeps
    /// only columns matching the slim allow-list, in header order.
    pub fn slim_csv(&self) -> String {
        let kept: Vec<&String> = self
            .columns
            .iter()
            .filter(|col| {
                let lower = col.to_lowercase();
                SLIM_PATTERNS.iter().any(|pattern| lower.contains(pattern))
            })
            .collect();

        if kept.is_empty() {
            return String::new();
        }

        let mut out = kept
            .iter()
            .map(|col| escape_cell(col))
            .collect::<Vec<_>>()
            .join(",");
        out.push('\n');

        for row in &self.rows {
            let line = kept
                .iter()
                .map(|col| escape_cell(row.get(*col).map(String::as_str).unwrap_or("")))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
            out.push('\n');
        }

        out
    }

    /// Textual per-column summary that accompanies every turn once a dataset
    /// is loaded; the model sees this instead of raw rows.
    pub fn summary(&self, options: &SummaryOptions) -> String {
        let mut lines = vec![format!(
            "Dataset: {} rows, {} columns.",
            self.rows.len(),
            self.columns.len()
        )];

        for column in &self.columns {
            let non_empty: Vec<&str> = self
                .rows
                .iter()
                .filter_map(|row| row.get(column))
                .map(String::as_str)
                .filter(|v| !v.trim().is_empty())
                .collect();

            if non_empty.is_empty() {
                lines.push(format!("- {column}: empty"));
                continue;
            }

            let numeric: Vec<f64> = non_empty.iter().filter_map(|v| parse_numeric(v)).collect();
            let numeric_share = numeric.len() as f64 / non_empty.len() as f64;

            if numeric_share >= options.numeric_threshold {
                let mean = numeric.iter().sum::<f64>() / numeric.len() as f64;
                let min = numeric.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = numeric.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                lines.push(format!(
                    "- {column} (numeric): mean={}, min={}, max={}",
                    round4(mean),
                    round4(min),
                    round4(max)
                ));
            } else {
                let mut order: Vec<&str> = Vec::new();
                let mut counts: std::collections::HashMap<&str, usize> =
                    std::collections::HashMap::new();
                for value in &non_empty {
                    if !counts.contains_key(value) {
                        order.push(value);
                    }
                    *counts.entry(value).or_insert(0) += 1;
                }
                order.sort_by(|a, b| counts[b].cmp(&counts[a]));
                let top = order
                    .iter()
                    .take(options.top_values)
                    .map(|value| format!("{} ({})", value, counts[value]))
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("- {column} (categorical): top values: {top}"));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsvDataset {
        CsvDataset::from_text(
            "text,view_count,favorite_count,lang\n\
             hello,100,10,en\n\
             bonjour,200,0,fr\n\
             hola,broken,5,es\n",
        )
    }

    #[test]
    fn engagement_enrichment_is_idempotent() {
        let mut dataset = sample();
        dataset.enrich_engagement();
        let columns_once = dataset.columns.clone();
        let rows_once = dataset.rows.clone();

        dataset.enrich_engagement();
        assert_eq!(dataset.columns, columns_once);
        assert_eq!(dataset.rows, rows_once);
        assert_eq!(dataset.columns.last().unwrap(), "engagement");
    }

    #[test]
    fn engagement_requires_positive_finite_sources() {
        let mut dataset = sample();
        dataset.enrich_engagement();

        assert_eq!(dataset.rows[0].get("engagement").unwrap(), "0.1");
        // Zero favorites and an unparseable view count both yield null.
        assert_eq!(dataset.rows[1].get("engagement").unwrap(), "");
        assert_eq!(dataset.rows[2].get("engagement").unwrap(), "");
    }

    #[test]
    fn enrichment_skips_when_source_columns_missing() {
        let mut dataset = CsvDataset::from_text("a,b\n1,2\n");
        dataset.enrich_engagement();
        assert_eq!(dataset.columns, vec!["a", "b"]);
    }

    #[test]
    fn slim_projection_keeps_allow_listed_columns_in_order() {
        let dataset = CsvDataset::from_text(
            "id,text,internal_score,view_count\n1,\"a, b\",9,50\n2,c,8,60\n",
        );
        let slim = dataset.slim_csv();
        let mut lines = slim.lines();

        assert_eq!(lines.next().unwrap(), "text,view_count");
        assert_eq!(lines.next().unwrap(), "\"a, b\",50");
        assert_eq!(lines.next().unwrap(), "c,60");
    }

    #[test]
    fn summary_classifies_numeric_and_categorical() {
        let dataset = sample();
        let summary = dataset.summary(&SummaryOptions::default());

        assert!(summary.starts_with("Dataset: 3 rows, 4 columns."));
        assert!(summary.contains("favorite_count (numeric)"));
        // Only 2 of 3 view_count values parse; below the 0.8 threshold.
        assert!(summary.contains("view_count (categorical)"));
        assert!(summary.contains("lang (categorical)"));
    }

    #[test]
    fn summary_threshold_is_configurable() {
        let dataset = sample();
        let options = SummaryOptions {
            numeric_threshold: 0.5,
            ..SummaryOptions::default()
        };
        assert!(dataset.summary(&options).contains("view_count (numeric)"));
    }
}
