use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::llm::Narrative;
use crate::model::Report;
use crate::profiler::{ChartType, DataProfile};

use super::RenderedChart;
use super::charts::escape;

/// Assembles the single HTML layout every export format starts from.
/// Charts are embedded as data URIs so the document is self-contained.
pub fn build_layout(
    report: &Report,
    narrative: &Narrative,
    charts: &[RenderedChart],
    profile: &DataProfile,
    cover_image: Option<&[u8]>,
) -> String {
    let mut html = String::with_capacity(16 * 1024);
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape(&report.title)));
    html.push_str(STYLES);
    html.push_str("</head>\n<body>\n");

    if let Some(image) = cover_image {
        html.push_str(&format!(
            "<div class=\"cover\"><img src=\"data:image/png;base64,{}\" alt=\"cover\"></div>\n",
            BASE64.encode(image)
        ));
    }

    html.push_str(&format!("<h1>{}</h1>\n", escape(&report.title)));
    html.push_str(&format!(
        "<p class=\"meta\">{} report · generated {}</p>\n",
        report.style.as_str(),
        report.created_at.format("%Y-%m-%d"),
    ));

    html.push_str("<h2>Executive summary</h2>\n");
    html.push_str(&format!(
        "<p>{}</p>\n",
        escape(&narrative.executive_summary)
    ));

    if !narrative.key_findings.is_empty() {
        html.push_str("<h2>Key findings</h2>\n<ul>\n");
        for finding in &narrative.key_findings {
            html.push_str(&format!("<li>{}</li>\n", escape(finding)));
        }
        html.push_str("</ul>\n");
    }

    for section in &narrative.sections {
        html.push_str(&format!("<h2>{}</h2>\n", escape(&section.heading)));
        for paragraph in section.content.split("\n\n") {
            html.push_str(&format!("<p>{}</p>\n", escape(paragraph.trim())));
        }
    }

    if !charts.is_empty() {
        html.push_str("<h2>Charts</h2>\n");
        for chart in charts {
            html.push_str(&format!(
                "<figure><img src=\"data:image/svg+xml;base64,{}\" alt=\"{}\">\
                 <figcaption>{}</figcaption></figure>\n",
                BASE64.encode(&chart.image),
                escape(&chart.config.title),
                escape(&chart.config.title),
            ));
        }
    }

    if profile
        .suggested_charts
        .iter()
        .any(|s| s.chart_type == ChartType::Table)
    {
        html.push_str("<h2>Data summary</h2>\n");
        html.push_str(&profile_table(profile));
    }

    if !narrative.recommendations.is_empty() {
        html.push_str("<h2>Recommendations</h2>\n<ol>\n");
        for recommendation in &narrative.recommendations {
            html.push_str(&format!("<li>{}</li>\n", escape(recommendation)));
        }
        html.push_str("</ol>\n");
    }

    html.push_str(&format!(
        "<p class=\"meta\">{} rows · {} columns · data quality {}/100</p>\n",
        profile.row_count, profile.column_count, profile.data_quality_score,
    ));
    html.push_str("</body>\n</html>\n");
    html
}

fn profile_table(profile: &DataProfile) -> String {
    let mut table = String::from(
        "<table>\n<tr><th>Column</th><th>Type</th><th>Nulls</th><th>Unique</th>\
         <th>Min</th><th>Max</th><th>Mean</th></tr>\n",
    );
    for column in &profile.columns {
        let fmt = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_default();
        table.push_str(&format!(
            "<tr><td>{}</td><td>{:?}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&column.name),
            column.column_type,
            column.null_count,
            column.unique_count,
            fmt(column.min),
            fmt(column.max),
            fmt(column.mean),
        ));
    }
    table.push_str("</table>\n");
    table
}

const STYLES: &str = "<style>\n\
body { font-family: Georgia, serif; max-width: 860px; margin: 2rem auto; color: #1d2430; }\n\
h1 { border-bottom: 2px solid #2c6e9b; padding-bottom: 0.3rem; }\n\
h2 { color: #2c6e9b; margin-top: 2rem; }\n\
.meta { color: #6b7280; font-size: 0.85rem; }\n\
figure { margin: 1.5rem 0; text-align: center; }\n\
figcaption { color: #6b7280; font-size: 0.85rem; }\n\
table { border-collapse: collapse; width: 100%; font-size: 0.9rem; }\n\
th, td { border: 1px solid #d1d5db; padding: 0.3rem 0.6rem; text-align: left; }\n\
.cover img { width: 100%; border-radius: 4px; }\n\
</style>\n";
