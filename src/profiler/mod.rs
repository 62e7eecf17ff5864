pub mod charts;
pub mod infer;
pub mod normalize;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::InputBlock;

pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Datetime,
    Text,
    Boolean,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub null_count: u64,
    pub unique_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_values: Option<Vec<ValueCount>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_max: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    StackedBar,
    Pie,
    Donut,
    Area,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSuggestion {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_axis: Option<Vec<String>>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataProfile {
    pub row_count: u64,
    pub column_count: u64,
    pub columns: Vec<ColumnProfile>,
    pub data_quality_score: u8,
    pub suggested_charts: Vec<ChartSuggestion>,
}

/// Profiler output: the derived profile plus the normalized record set and
/// the untouched free-text blocks, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfiledInput {
    pub profile: DataProfile,
    pub records: Vec<Record>,
    pub text_blocks: Vec<String>,
}

/// Normalizes all input blocks into one record set, profiles every column
/// and derives chart suggestions. Synchronous and CPU-bound by design.
#[tracing::instrument(name = "profiler.profile_inputs", skip(blocks), fields(
    profile.rows,
    profile.columns,
    profile.quality_score,
))]
pub fn profile_inputs(blocks: &[InputBlock]) -> Result<ProfiledInput, AppError> {
    let (records, text_blocks) = normalize::normalize_blocks(blocks)?;

    let column_names = normalize::column_order(&records);
    let row_count = records.len() as u64;

    let columns: Vec<ColumnProfile> = column_names
        .iter()
        .map(|name| infer::profile_column(name, &records))
        .collect();

    let data_quality_score = infer::quality_score(&columns, row_count);
    let suggested_charts = charts::suggest_charts(&columns, row_count);

    let profile = DataProfile {
        row_count,
        column_count: columns.len() as u64,
        columns,
        data_quality_score,
        suggested_charts,
    };

    let span = tracing::Span::current();
    span.record("profile.rows", profile.row_count);
    span.record("profile.columns", profile.column_count);
    span.record("profile.quality_score", profile.data_quality_score);

    Ok(ProfiledInput {
        profile,
        records,
        text_blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records_block(rows: Vec<serde_json::Value>) -> InputBlock {
        InputBlock::Records { records: rows }
    }

    #[test]
    fn test_profile_mixed_blocks() {
        let blocks = vec![
            records_block(vec![
                json!({"region": "north", "revenue": 120.5}),
                json!({"region": "south", "revenue": 98.0}),
            ]),
            InputBlock::Csv {
                content: "region,revenue\neast,140.25\nwest,77.75".to_string(),
            },
            InputBlock::Text {
                content: "Revenue grew across all regions.".to_string(),
            },
        ];

        let profiled = profile_inputs(&blocks).unwrap();
        assert_eq!(profiled.records.len(), 4);
        assert_eq!(profiled.text_blocks.len(), 1);
        assert_eq!(profiled.profile.row_count, 4);
        assert_eq!(profiled.profile.column_count, 2);

        let revenue = profiled
            .profile
            .columns
            .iter()
            .find(|c| c.name == "revenue")
            .unwrap();
        assert_eq!(revenue.column_type, ColumnType::Numeric);
    }

    #[test]
    fn test_profile_schema_union_fills_nulls() {
        let blocks = vec![
            records_block(vec![json!({"a": 1})]),
            records_block(vec![json!({"b": 2})]),
        ];
        let profiled = profile_inputs(&blocks).unwrap();
        assert_eq!(profiled.profile.column_count, 2);

        let a = profiled
            .profile
            .columns
            .iter()
            .find(|c| c.name == "a")
            .unwrap();
        assert_eq!(a.null_count, 1);
    }

    #[test]
    fn test_profile_empty_input_scores_zero() {
        let blocks = vec![InputBlock::Text {
            content: "only prose".to_string(),
        }];
        let profiled = profile_inputs(&blocks).unwrap();
        assert_eq!(profiled.profile.row_count, 0);
        assert_eq!(profiled.profile.data_quality_score, 0);
        assert!(profiled.profile.suggested_charts.is_empty());
    }

    #[test]
    fn test_quality_score_bounds_hold() {
        let blocks = vec![records_block(vec![
            json!({"x": null, "y": "zzz"}),
            json!({"x": null, "y": null}),
        ])];
        let profiled = profile_inputs(&blocks).unwrap();
        let score = profiled.profile.data_quality_score;
        assert!(score <= 100);
    }
}
