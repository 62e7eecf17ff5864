use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::Value;

use super::{ColumnProfile, ColumnType, Record, ValueCount};

const TYPE_THRESHOLD: f64 = 0.8;
const CATEGORICAL_RATIO: f64 = 0.5;
const CATEGORICAL_MIN_VALUES: usize = 10;
const TOP_VALUES_LIMIT: usize = 5;

/// Profiles one column over the full concatenated record set: infers its
/// type, then computes the type-conditional statistics.
pub fn profile_column(name: &str, records: &[Record]) -> ColumnProfile {
    let values: Vec<&Value> = records
        .iter()
        .map(|r| r.get(name).unwrap_or(&Value::Null))
        .collect();
    let non_null: Vec<&Value> = values.iter().copied().filter(|v| !is_null(v)).collect();
    let null_count = (values.len() - non_null.len()) as u64;

    let column_type = infer_type(&non_null);
    let unique_count = distinct_count(&non_null);

    let mut profile = ColumnProfile {
        name: name.to_string(),
        column_type,
        null_count,
        unique_count,
        min: None,
        max: None,
        mean: None,
        median: None,
        std_dev: None,
        top_values: None,
        date_min: None,
        date_max: None,
    };

    match column_type {
        ColumnType::Numeric => {
            let numbers: Vec<f64> = non_null.iter().filter_map(|v| as_number(v)).collect();
            if !numbers.is_empty() {
                profile.min = Some(numbers.iter().cloned().fold(f64::INFINITY, f64::min));
                profile.max = Some(numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
                profile.mean = Some(numbers.iter().sum::<f64>() / numbers.len() as f64);
                profile.median = Some(median(&numbers));
                profile.std_dev = Some(std_dev(&numbers));
            }
        }
        ColumnType::Categorical | ColumnType::Text => {
            profile.top_values = Some(top_values(&non_null));
        }
        ColumnType::Datetime => {
            let mut dates: Vec<NaiveDate> = non_null.iter().filter_map(|v| as_date(v)).collect();
            dates.sort();
            profile.date_min = dates.first().map(|d| d.format("%Y-%m-%d").to_string());
            profile.date_max = dates.last().map(|d| d.format("%Y-%m-%d").to_string());
        }
        ColumnType::Boolean | ColumnType::Unknown => {}
    }

    profile
}

/// Type inference over the non-null values of a column. The order is
/// significant: date and boolean run before numeric because their string
/// forms can be numeric-coercible.
pub fn infer_type(non_null: &[&Value]) -> ColumnType {
    if non_null.is_empty() {
        return ColumnType::Unknown;
    }
    let total = non_null.len() as f64;

    let date_count = non_null.iter().filter(|v| as_date(v).is_some()).count();
    if date_count as f64 / total >= TYPE_THRESHOLD {
        return ColumnType::Datetime;
    }

    let bool_count = non_null.iter().filter(|v| as_bool(v).is_some()).count();
    if bool_count as f64 / total >= TYPE_THRESHOLD {
        return ColumnType::Boolean;
    }

    let numeric_count = non_null.iter().filter(|v| as_number(v).is_some()).count();
    if numeric_count as f64 / total >= TYPE_THRESHOLD {
        return ColumnType::Numeric;
    }

    let distinct = distinct_count(non_null) as f64;
    if distinct / total < CATEGORICAL_RATIO && non_null.len() > CATEGORICAL_MIN_VALUES {
        return ColumnType::Categorical;
    }

    ColumnType::Text
}

/// Data quality score per the scoring model: null density, uniqueness of
/// non-categorical columns, and unknown-type share. Empty datasets score 0.
pub fn quality_score(columns: &[ColumnProfile], row_count: u64) -> u8 {
    if columns.is_empty() || row_count == 0 {
        return 0;
    }

    let mut score = 100.0;

    let total_cells = (row_count * columns.len() as u64) as f64;
    let null_cells: u64 = columns.iter().map(|c| c.null_count).sum();
    score -= 30.0 * (null_cells as f64 / total_cells);

    let non_categorical: Vec<&ColumnProfile> = columns
        .iter()
        .filter(|c| c.column_type != ColumnType::Categorical)
        .collect();
    if !non_categorical.is_empty() {
        let avg_uniqueness = non_categorical
            .iter()
            .map(|c| c.unique_count as f64 / row_count as f64)
            .sum::<f64>()
            / non_categorical.len() as f64;
        if avg_uniqueness < 0.1 {
            score -= 20.0;
        }
    }

    let unknown = columns
        .iter()
        .filter(|c| c.column_type == ColumnType::Unknown)
        .count();
    score -= 20.0 * (unknown as f64 / columns.len() as f64);

    score.round().clamp(0.0, 100.0) as u8
}

pub fn is_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("true") {
                Some(true)
            } else if trimmed.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

pub fn as_date(value: &Value) -> Option<NaiveDate> {
    let Value::String(s) = value else {
        return None;
    };
    let trimmed = s.trim();
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.date_naive());
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}

/// Canonical string form used for distinct counting and top-value grouping.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn distinct_count(non_null: &[&Value]) -> u64 {
    let mut seen = HashSet::new();
    for value in non_null {
        seen.insert(value_key(value));
    }
    seen.len() as u64
}

/// Midpoint of sorted values; average of the two middle values for even
/// counts.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Population standard deviation (not sample-corrected).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// The 5 most frequent distinct values with counts, frequency sort stable so
/// ties keep first-seen order.
fn top_values(non_null: &[&Value]) -> Vec<ValueCount> {
    let mut counts: Vec<ValueCount> = Vec::new();
    for value in non_null {
        let key = value_key(value);
        match counts.iter_mut().find(|c| c.value == key) {
            Some(entry) => entry.count += 1,
            None => counts.push(ValueCount {
                value: key,
                count: 1,
            }),
        }
    }
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(TOP_VALUES_LIMIT);
    counts
}
