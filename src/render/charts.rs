use std::collections::BTreeMap;

use crate::error::AppError;
use crate::profiler::{ChartSuggestion, ChartType, DataProfile, Record, infer};

use super::{ChartRenderer, RenderedChart};

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 360.0;
const PADDING: f64 = 40.0;

/// Built-in deterministic SVG renderer. Table suggestions are rendered by
/// the layout stage as HTML, not here.
pub struct SvgChartRenderer;

#[async_trait::async_trait]
impl ChartRenderer for SvgChartRenderer {
    async fn render(
        &self,
        suggestions: &[ChartSuggestion],
        records: &[Record],
        _profile: &DataProfile,
    ) -> Result<Vec<RenderedChart>, AppError> {
        let mut rendered = Vec::new();
        for (index, suggestion) in suggestions.iter().enumerate() {
            let svg = match suggestion.chart_type {
                ChartType::Table => continue,
                ChartType::Pie | ChartType::Donut => pie_svg(suggestion, records),
                ChartType::Line | ChartType::Area => line_svg(suggestion, records),
                ChartType::Bar | ChartType::StackedBar => bar_svg(suggestion, records),
            };
            rendered.push(RenderedChart {
                id: format!("chart-{index}"),
                config: suggestion.clone(),
                image: svg.into_bytes(),
            });
        }
        Ok(rendered)
    }
}

fn first_y(suggestion: &ChartSuggestion) -> Option<&str> {
    suggestion
        .y_axis
        .as_ref()
        .and_then(|y| y.first())
        .map(|s| s.as_str())
}

fn svg_header(title: &str) -> String {
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" \
         viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n\
         <text x=\"{x}\" y=\"20\" text-anchor=\"middle\" font-size=\"14\">{title}</text>\n",
        x = WIDTH / 2.0,
        title = escape(title),
    )
}

fn line_svg(suggestion: &ChartSuggestion, records: &[Record]) -> String {
    let Some(y_col) = first_y(suggestion) else {
        return empty_svg(&suggestion.title);
    };

    let mut points: Vec<(String, f64)> = Vec::new();
    for record in records {
        let x = suggestion
            .x_axis
            .as_deref()
            .and_then(|c| record.get(c))
            .map(infer::value_key)
            .unwrap_or_default();
        if let Some(y) = record.get(y_col).and_then(infer::as_number) {
            points.push((x, y));
        }
    }
    points.sort_by(|a, b| a.0.cmp(&b.0));

    if points.is_empty() {
        return empty_svg(&suggestion.title);
    }

    let max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let span = if (max - min).abs() < f64::EPSILON {
        1.0
    } else {
        max - min
    };
    let step = (WIDTH - 2.0 * PADDING) / (points.len().max(2) - 1) as f64;

    let coords: Vec<String> = points
        .iter()
        .enumerate()
        .map(|(i, (_, y))| {
            let px = PADDING + i as f64 * step;
            let py = HEIGHT - PADDING - ((y - min) / span) * (HEIGHT - 2.0 * PADDING);
            format!("{px:.1},{py:.1}")
        })
        .collect();

    let mut svg = svg_header(&suggestion.title);
    svg.push_str(&format!(
        "<polyline fill=\"none\" stroke=\"#2c6e9b\" stroke-width=\"2\" points=\"{}\"/>\n",
        coords.join(" ")
    ));
    svg.push_str("</svg>\n");
    svg
}

fn bar_svg(suggestion: &ChartSuggestion, records: &[Record]) -> String {
    let Some(y_col) = first_y(suggestion) else {
        return empty_svg(&suggestion.title);
    };

    // Sum of y per x category, category order sorted for determinism.
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for record in records {
        let Some(x) = suggestion
            .x_axis
            .as_deref()
            .and_then(|c| record.get(c))
            .map(infer::value_key)
        else {
            continue;
        };
        if let Some(y) = record.get(y_col).and_then(infer::as_number) {
            *totals.entry(x).or_insert(0.0) += y;
        }
    }

    if totals.is_empty() {
        return empty_svg(&suggestion.title);
    }

    let max = totals.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    let max = if max <= 0.0 { 1.0 } else { max };
    let slot = (WIDTH - 2.0 * PADDING) / totals.len() as f64;

    let mut svg = svg_header(&suggestion.title);
    for (i, (label, value)) in totals.iter().enumerate() {
        let height = (value / max) * (HEIGHT - 2.0 * PADDING);
        let x = PADDING + i as f64 * slot + slot * 0.1;
        let y = HEIGHT - PADDING - height;
        svg.push_str(&format!(
            "<rect x=\"{x:.1}\" y=\"{y:.1}\" width=\"{w:.1}\" height=\"{height:.1}\" fill=\"#4a8f5d\"/>\n",
            w = slot * 0.8,
        ));
        svg.push_str(&format!(
            "<text x=\"{tx:.1}\" y=\"{ty:.1}\" text-anchor=\"middle\" font-size=\"10\">{label}</text>\n",
            tx = x + slot * 0.4,
            ty = HEIGHT - PADDING + 14.0,
            label = escape(label),
        ));
    }
    svg.push_str("</svg>\n");
    svg
}

fn pie_svg(suggestion: &ChartSuggestion, records: &[Record]) -> String {
    let Some(x_col) = suggestion.x_axis.as_deref() else {
        return empty_svg(&suggestion.title);
    };

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for record in records {
        if let Some(value) = record.get(x_col)
            && !infer::is_null(value)
        {
            *counts.entry(infer::value_key(value)).or_insert(0) += 1;
        }
    }

    let total: u64 = counts.values().sum();
    if total == 0 {
        return empty_svg(&suggestion.title);
    }

    let cx = WIDTH / 2.0;
    let cy = HEIGHT / 2.0 + 10.0;
    let r = (HEIGHT - 3.0 * PADDING) / 2.0;
    let palette = ["#2c6e9b", "#4a8f5d", "#c2803d", "#8d5a9e", "#b5484d", "#5b5f97"];

    let mut svg = svg_header(&suggestion.title);
    let mut angle = -std::f64::consts::FRAC_PI_2;
    for (i, (label, count)) in counts.iter().enumerate() {
        let fraction = *count as f64 / total as f64;
        let sweep = fraction * std::f64::consts::TAU;
        let end = angle + sweep;
        let (x1, y1) = (cx + r * angle.cos(), cy + r * angle.sin());
        let (x2, y2) = (cx + r * end.cos(), cy + r * end.sin());
        let large = if sweep > std::f64::consts::PI { 1 } else { 0 };
        svg.push_str(&format!(
            "<path d=\"M{cx:.1},{cy:.1} L{x1:.1},{y1:.1} A{r:.1},{r:.1} 0 {large} 1 {x2:.1},{y2:.1} Z\" \
             fill=\"{color}\"><title>{label}: {count}</title></path>\n",
            color = palette[i % palette.len()],
            label = escape(label),
        ));
        angle = end;
    }
    svg.push_str("</svg>\n");
    svg
}

fn empty_svg(title: &str) -> String {
    let mut svg = svg_header(title);
    svg.push_str(&format!(
        "<text x=\"{x}\" y=\"{y}\" text-anchor=\"middle\" font-size=\"12\">no data</text>\n</svg>\n",
        x = WIDTH / 2.0,
        y = HEIGHT / 2.0,
    ));
    svg
}

pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::ChartType;
    use serde_json::json;

    fn record(pairs: serde_json::Value) -> Record {
        serde_json::from_value(pairs).unwrap()
    }

    fn suggestion(chart_type: ChartType, x: &str, y: Option<&str>) -> ChartSuggestion {
        ChartSuggestion {
            chart_type,
            title: "Test chart".to_string(),
            x_axis: Some(x.to_string()),
            y_axis: y.map(|y| vec![y.to_string()]),
            reason: String::new(),
        }
    }

    fn profile() -> DataProfile {
        DataProfile {
            row_count: 0,
            column_count: 0,
            columns: vec![],
            data_quality_score: 0,
            suggested_charts: vec![],
        }
    }

    #[tokio::test]
    async fn test_renders_svg_per_suggestion_skipping_tables() {
        let suggestions = vec![
            suggestion(ChartType::Bar, "region", Some("revenue")),
            ChartSuggestion {
                chart_type: ChartType::Table,
                title: "Data summary".to_string(),
                x_axis: None,
                y_axis: None,
                reason: String::new(),
            },
        ];
        let records = vec![
            record(json!({"region": "north", "revenue": 10})),
            record(json!({"region": "south", "revenue": 20})),
        ];

        let rendered = SvgChartRenderer
            .render(&suggestions, &records, &profile())
            .await
            .unwrap();
        assert_eq!(rendered.len(), 1);
        let svg = String::from_utf8(rendered[0].image.clone()).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("<rect"));
    }

    #[tokio::test]
    async fn test_pie_arcs_cover_categories() {
        let suggestions = vec![suggestion(ChartType::Pie, "kind", None)];
        let records = vec![
            record(json!({"kind": "a"})),
            record(json!({"kind": "a"})),
            record(json!({"kind": "b"})),
        ];
        let rendered = SvgChartRenderer
            .render(&suggestions, &records, &profile())
            .await
            .unwrap();
        let svg = String::from_utf8(rendered[0].image.clone()).unwrap();
        assert_eq!(svg.matches("<path").count(), 2);
    }

    #[tokio::test]
    async fn test_line_with_no_numeric_data_degrades() {
        let suggestions = vec![suggestion(ChartType::Line, "day", Some("v"))];
        let records = vec![record(json!({"day": "2024-01-01", "v": "n/a"}))];
        let rendered = SvgChartRenderer
            .render(&suggestions, &records, &profile())
            .await
            .unwrap();
        let svg = String::from_utf8(rendered[0].image.clone()).unwrap();
        assert!(svg.contains("no data"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
