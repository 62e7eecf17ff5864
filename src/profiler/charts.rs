use super::{ChartSuggestion, ChartType, ColumnProfile, ColumnType};

const MAX_SUGGESTIONS: usize = 8;
const PIE_MAX_CATEGORIES: u64 = 8;

/// Applies the fixed-order suggestion rules and caps the result at 8.
/// Insertion order is priority order; excess is truncated from the end.
pub fn suggest_charts(columns: &[ColumnProfile], row_count: u64) -> Vec<ChartSuggestion> {
    let numeric: Vec<&ColumnProfile> = columns
        .iter()
        .filter(|c| c.column_type == ColumnType::Numeric)
        .collect();
    let categorical: Vec<&ColumnProfile> = columns
        .iter()
        .filter(|c| c.column_type == ColumnType::Categorical)
        .collect();
    let datetime: Vec<&ColumnProfile> = columns
        .iter()
        .filter(|c| c.column_type == ColumnType::Datetime)
        .collect();

    let mut suggestions = Vec::new();

    // Rule 1: time series for up to 3 numeric columns against the first
    // datetime column.
    if let Some(time_col) = datetime.first() {
        for num_col in numeric.iter().take(3) {
            suggestions.push(ChartSuggestion {
                chart_type: ChartType::Line,
                title: format!("{} over time", num_col.name),
                x_axis: Some(time_col.name.clone()),
                y_axis: Some(vec![num_col.name.clone()]),
                reason: format!(
                    "Numeric column '{}' can be trended against '{}'",
                    num_col.name, time_col.name
                ),
            });
        }
    }

    // Rule 2: bar per categorical x numeric combination (2 x 2).
    for cat_col in categorical.iter().take(2) {
        for num_col in numeric.iter().take(2) {
            suggestions.push(ChartSuggestion {
                chart_type: ChartType::Bar,
                title: format!("{} by {}", num_col.name, cat_col.name),
                x_axis: Some(cat_col.name.clone()),
                y_axis: Some(vec![num_col.name.clone()]),
                reason: format!(
                    "Compare '{}' across the '{}' categories",
                    num_col.name, cat_col.name
                ),
            });
        }
    }

    // Rule 3: pie for low-cardinality categorical columns.
    for cat_col in categorical
        .iter()
        .filter(|c| c.unique_count <= PIE_MAX_CATEGORIES)
        .take(2)
    {
        suggestions.push(ChartSuggestion {
            chart_type: ChartType::Pie,
            title: format!("Distribution of {}", cat_col.name),
            x_axis: Some(cat_col.name.clone()),
            y_axis: None,
            reason: format!(
                "'{}' has only {} distinct values, suitable for a share breakdown",
                cat_col.name, cat_col.unique_count
            ),
        });
    }

    // Rule 4: stacked bar combining the first categorical column with up to
    // 3 numeric columns.
    if numeric.len() >= 2
        && let Some(cat_col) = categorical.first()
    {
        let series: Vec<String> = numeric.iter().take(3).map(|c| c.name.clone()).collect();
        suggestions.push(ChartSuggestion {
            chart_type: ChartType::StackedBar,
            title: format!("{} breakdown by {}", series.join(", "), cat_col.name),
            x_axis: Some(cat_col.name.clone()),
            y_axis: Some(series),
            reason: format!(
                "Multiple numeric columns can be stacked per '{}' category",
                cat_col.name
            ),
        });
    }

    // Rule 5: summary table whenever any records exist, always last.
    if row_count > 0 {
        suggestions.push(ChartSuggestion {
            chart_type: ChartType::Table,
            title: "Data summary".to_string(),
            x_axis: None,
            y_axis: None,
            reason: "Tabular summary of the underlying records".to_string(),
        });
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}
