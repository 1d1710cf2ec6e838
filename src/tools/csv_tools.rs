use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::instrument;

use crate::dataset::stats::{column_stats, parse_numeric, resolve_column, value_counts};
use crate::dataset::{CsvDataset, Row, ToolError};

use super::{require_str, ChartPayload, EngagementPoint, ToolDeclaration, ToolOutcome, Toolset};

// Protocol-fixed tool names; the completion endpoint matches on these exact
// strings.
pub const COMPUTE_COLUMN_STATS: &str = "compute_column_stats";
pub const GET_VALUE_COUNTS: &str = "get_value_counts";
pub const GET_TOP_TWEETS: &str = "get_top_tweets";

const TEXT_PREVIEW_CHARS: usize = 150;

/// Tools over the currently loaded CSV dataset. Engagement enrichment is a
/// dataset-load step, not a tool; by the time this set runs the dataset is
/// already enriched.
pub struct CsvToolset<'a> {
    dataset: &'a CsvDataset,
}

impl<'a> CsvToolset<'a> {
    pub fn new(dataset: &'a CsvDataset) -> Self {
        Self { dataset }
    }

    fn top_rows(&self, args: &Value) -> ToolOutcome {
        let requested = match require_str(args, "sort_column") {
            Ok(value) => value,
            Err(err) => return ToolOutcome::error(err),
        };
        let n = args.get("n").and_then(Value::as_u64).unwrap_or(10) as usize;
        let ascending = args
            .get("ascending")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let sort_column = resolve_column(&self.dataset.columns, requested);
        if !self.dataset.columns.contains(&sort_column) || self.dataset.rows.is_empty() {
            return ToolOutcome::error(ToolError::new(format!(
                "Cannot rank by '{}'. Available columns: {}",
                requested,
                self.dataset.columns.join(", ")
            )));
        }

        let mut ranked: Vec<&Row> = self.dataset.rows.iter().collect();
        // Non-numeric pairs compare equal and stay in place; a known quirk of
        // the ranking contract, preserved deliberately.
        ranked.sort_by(|a, b| {
            let left = a.get(&sort_column).and_then(|v| parse_numeric(v));
            let right = b.get(&sort_column).and_then(|v| parse_numeric(v));
            match (left, right) {
                (Some(l), Some(r)) => {
                    let ordering = l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal);
                    if ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                }
                _ => std::cmp::Ordering::Equal,
            }
        });
        ranked.truncate(n);

        let text_col = self.dataset.find_column("text").cloned();
        let favorite_col = self.dataset.find_column("favorite").cloned();
        let view_col = self.dataset.find_column("view").cloned();
        let has_engagement = self
            .dataset
            .columns
            .iter()
            .any(|col| col == CsvDataset::ENGAGEMENT_COLUMN);

        let mut projected = Vec::with_capacity(ranked.len());
        let mut points = Vec::with_capacity(ranked.len());

        for (idx, row) in ranked.iter().enumerate() {
            let rank = idx + 1;
            let mut entry = Map::new();
            entry.insert("rank".to_string(), json!(rank));

            let text = text_col.as_ref().and_then(|col| row.get(col)).map(|text| {
                let preview: String = text.chars().take(TEXT_PREVIEW_CHARS).collect();
                preview
            });
            if let Some(text) = &text {
                entry.insert("text".to_string(), json!(text));
            }
            if let Some(col) = &favorite_col {
                if let Some(value) = row.get(col) {
                    entry.insert(col.clone(), json!(value));
                }
            }
            if let Some(col) = &view_col {
                if let Some(value) = row.get(col) {
                    entry.insert(col.clone(), json!(value));
                }
            }

            let engagement = if has_engagement {
                row.get(CsvDataset::ENGAGEMENT_COLUMN)
                    .and_then(|v| parse_numeric(v))
            } else {
                None
            };
            if let Some(value) = engagement {
                entry.insert(CsvDataset::ENGAGEMENT_COLUMN.to_string(), json!(value));
            }

            points.push(EngagementPoint {
                rank,
                text,
                engagement,
            });
            projected.push(Value::Object(entry));
        }

        let result = json!({ "sort_column": sort_column, "rows": projected });
        if points.iter().any(|point| point.engagement.is_some()) {
            ToolOutcome::with_chart(result, ChartPayload::EngagementChart { points })
        } else {
            ToolOutcome::ok(result)
        }
    }
}

#[async_trait]
impl Toolset for CsvToolset<'_> {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        vec![
            ToolDeclaration::new(
                COMPUTE_COLUMN_STATS,
                "Compute count, mean, median, std, min and max for one numeric column of the loaded dataset.",
                json!({
                    "type": "object",
                    "properties": {
                        "column": {
                            "type": "string",
                            "description": "Column name to analyze; matched case-insensitively"
                        }
                    },
                    "required": ["column"]
                }),
            ),
            ToolDeclaration::new(
                GET_VALUE_COUNTS,
                "Count the most frequent values of one column. Use for categorical columns such as language or type.",
                json!({
                    "type": "object",
                    "properties": {
                        "column": {
                            "type": "string",
                            "description": "Column name to count values of"
                        },
                        "top_n": {
                            "type": "integer",
                            "description": "How many distinct values to return (default 10)"
                        }
                    },
                    "required": ["column"]
                }),
            ),
            ToolDeclaration::new(
                GET_TOP_TWEETS,
                "Rank rows by a numeric metric column and return the top entries with text previews. Defaults to descending order.",
                json!({
                    "type": "object",
                    "properties": {
                        "sort_column": {
                            "type": "string",
                            "description": "Numeric column to rank by, e.g. favorite_count or engagement"
                        },
                        "n": {
                            "type": "integer",
                            "description": "How many rows to return (default 10)"
                        },
                        "ascending": {
                            "type": "boolean",
                            "description": "Rank lowest-first instead of highest-first (default false)"
                        }
                    },
                    "required": ["sort_column"]
                }),
            ),
        ]
    }

    #[instrument(skip_all, fields(tool = name))]
    async fn execute(&self, name: &str, args: &Value) -> ToolOutcome {
        match name {
            COMPUTE_COLUMN_STATS => match require_str(args, "column") {
                Ok(column) => {
                    match column_stats(&self.dataset.rows, &self.dataset.columns, column) {
                        Ok(stats) => ToolOutcome::ok(
                            serde_json::to_value(stats).unwrap_or_else(|_| json!({})),
                        ),
                        Err(err) => ToolOutcome::error(err),
                    }
                }
                Err(err) => ToolOutcome::error(err),
            },
            GET_VALUE_COUNTS => match require_str(args, "column") {
                Ok(column) => {
                    let top_n = args.get("top_n").and_then(Value::as_u64).unwrap_or(10) as usize;
                    match value_counts(&self.dataset.rows, &self.dataset.columns, column, top_n) {
                        Ok(counts) => ToolOutcome::ok(json!({ "column": column, "counts": counts })),
                        Err(err) => ToolOutcome::error(err),
                    }
                }
                Err(err) => ToolOutcome::error(err),
            },
            GET_TOP_TWEETS => self.top_rows(args),
            other => ToolOutcome::error(ToolError::new(format!("Unknown tool '{other}'."))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> CsvDataset {
        let mut dataset = CsvDataset::from_text(
            "text,view_count,favorite_count\n\
             first post,100,10\n\
             second post,400,80\n\
             third post,200,10\n\
             broken,n/a,3\n",
        );
        dataset.enrich_engagement();
        dataset
    }

    #[tokio::test]
    async fn column_stats_tool_returns_rounded_summary() {
        let dataset = dataset();
        let toolset = CsvToolset::new(&dataset);

        let outcome = toolset
            .execute(COMPUTE_COLUMN_STATS, &json!({"column": "favorite_count"}))
            .await;

        assert!(!outcome.is_error());
        assert_eq!(outcome.result["count"], 4);
        assert_eq!(outcome.result["mean"], 25.75);
    }

    #[tokio::test]
    async fn missing_column_argument_is_a_value_error() {
        let dataset = dataset();
        let toolset = CsvToolset::new(&dataset);

        let outcome = toolset.execute(COMPUTE_COLUMN_STATS, &json!({})).await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn top_rows_rank_descending_by_default() {
        let dataset = dataset();
        let toolset = CsvToolset::new(&dataset);

        let outcome = toolset
            .execute(GET_TOP_TWEETS, &json!({"sort_column": "view_count", "n": 2}))
            .await;

        let rows = outcome.result["rows"].as_array().expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["text"], "second post");
        assert_eq!(rows[0]["rank"], 1);
        assert_eq!(rows[1]["text"], "third post");
    }

    #[tokio::test]
    async fn top_rows_leave_non_numeric_cells_in_place() {
        // The comparator returns Equal when either side fails to parse, so the
        // unparseable row keeps its relative position instead of sorting last.
        let dataset = dataset();
        let toolset = CsvToolset::new(&dataset);

        let outcome = toolset
            .execute(GET_TOP_TWEETS, &json!({"sort_column": "view_count", "n": 4}))
            .await;

        let rows = outcome.result["rows"].as_array().expect("rows");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3]["text"], "broken");
    }

    #[tokio::test]
    async fn top_rows_emit_engagement_chart_when_enriched() {
        let dataset = dataset();
        let toolset = CsvToolset::new(&dataset);

        let outcome = toolset
            .execute(GET_TOP_TWEETS, &json!({"sort_column": "engagement"}))
            .await;

        match outcome.chart {
            Some(ChartPayload::EngagementChart { points }) => {
                assert_eq!(points[0].rank, 1);
                assert!(points[0].engagement.is_some());
            }
            other => panic!("expected engagement chart, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresolvable_sort_column_is_an_error() {
        let dataset = dataset();
        let toolset = CsvToolset::new(&dataset);

        let outcome = toolset
            .execute(GET_TOP_TWEETS, &json!({"sort_column": "no_such_metric"}))
            .await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn unknown_tool_name_is_an_error() {
        let dataset = dataset();
        let toolset = CsvToolset::new(&dataset);
        let outcome = toolset.execute("mystery_tool", &json!({})).await;
        assert!(outcome.is_error());
    }
}
