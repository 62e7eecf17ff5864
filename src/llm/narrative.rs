use serde::Deserialize;

use crate::model::ReportStyle;
use crate::profiler::ColumnType;

use super::{Narrative, NarrativeParams, NarrativeSection};

const MAX_SAMPLE_RECORDS: usize = 20;
const MAX_TEXT_BLOCK_CHARS: usize = 2000;

pub fn system_prompt(style: ReportStyle) -> String {
    let voice = match style {
        ReportStyle::Business => {
            "You are a business analyst writing for executives. \
             Lead with outcomes and plain language."
        }
        ReportStyle::Research => {
            "You are a research analyst writing a rigorous study. \
             Qualify claims and reference the underlying data."
        }
        ReportStyle::Technical => {
            "You are a technical writer documenting findings for engineers. \
             Be precise about metrics and methods."
        }
    };
    format!(
        "{voice} Write clear, data-driven narrative with specific numbers. \
         Be concise but thorough."
    )
}

pub fn build_prompt(params: &NarrativeParams) -> String {
    let mut data_summary = String::new();
    for column in &params.profile.columns {
        data_summary.push_str(&format!(
            "\n## {} ({:?})\n",
            column.name, column.column_type
        ));
        data_summary.push_str(&format!(
            "Nulls: {}, Distinct: {}\n",
            column.null_count, column.unique_count
        ));
        match column.column_type {
            ColumnType::Numeric => {
                if let (Some(min), Some(max), Some(mean)) = (column.min, column.max, column.mean) {
                    data_summary
                        .push_str(&format!("Min: {min:.2}, Max: {max:.2}, Mean: {mean:.2}\n"));
                }
            }
            ColumnType::Datetime => {
                if let (Some(min), Some(max)) = (&column.date_min, &column.date_max) {
                    data_summary.push_str(&format!("Range: {min} to {max}\n"));
                }
            }
            _ => {
                if let Some(ref top) = column.top_values {
                    for entry in top {
                        data_summary
                            .push_str(&format!("  {}: {} occurrences\n", entry.value, entry.count));
                    }
                }
            }
        }
    }

    let sample: Vec<&crate::profiler::Record> =
        params.records.iter().take(MAX_SAMPLE_RECORDS).collect();
    let sample_json = serde_json::to_string_pretty(&sample).unwrap_or_default();

    let mut context = String::new();
    for block in &params.text_blocks {
        let truncated: String = block.chars().take(MAX_TEXT_BLOCK_CHARS).collect();
        context.push_str(&truncated);
        context.push_str("\n---\n");
    }

    let instructions = params
        .instructions
        .as_deref()
        .map(|i| format!("\nAdditional instructions: {i}\n"))
        .unwrap_or_default();

    format!(
        "Write an analytical report titled \"{title}\" from the profiled dataset below.\n\
        \n\
        Dataset: {rows} rows x {cols} columns, quality score {score}/100.\n\
        {data_summary}\n\
        Sample records:\n{sample_json}\n\
        \n\
        Supporting context:\n{context}\n\
        {instructions}\
        Return your report as JSON with this exact structure:\n\
        {{\n  \"executive_summary\": \"2-3 sentence overview\",\n  \
        \"sections\": [\n    {{\"heading\": \"Section title\", \"content\": \"Section content with data references\"}}\n  ],\n  \
        \"recommendations\": [\"actionable recommendation\"],\n  \
        \"key_findings\": [\"important insight\"]\n}}\n\n\
        Include 3-5 sections covering the major themes in the data.",
        title = params.title,
        rows = params.profile.row_count,
        cols = params.profile.column_count,
        score = params.profile.data_quality_score,
    )
}

/// Parses the model output, tolerating markdown fences and prose around the
/// JSON. Falls back to wrapping the raw content into a single section.
pub fn parse_narrative_response(content: &str) -> Narrative {
    let json_str = extract_json(content);

    #[derive(Deserialize)]
    struct RawNarrative {
        executive_summary: Option<String>,
        sections: Option<Vec<NarrativeSection>>,
        recommendations: Option<Vec<String>>,
        key_findings: Option<Vec<String>>,
    }

    match serde_json::from_str::<RawNarrative>(&json_str) {
        Ok(raw) => Narrative {
            executive_summary: raw
                .executive_summary
                .unwrap_or_else(|| "Analysis of the provided data.".to_string()),
            sections: raw.sections.unwrap_or_default(),
            recommendations: raw.recommendations.unwrap_or_default(),
            key_findings: raw.key_findings.unwrap_or_default(),
        },
        Err(_) => Narrative {
            executive_summary: content.chars().take(500).collect(),
            sections: vec![NarrativeSection {
                heading: "Analysis".to_string(),
                content: content.to_string(),
            }],
            recommendations: vec![],
            key_findings: vec![],
        },
    }
}

pub(crate) fn extract_json(content: &str) -> String {
    if let Some(start) = content.find("```json")
        && let Some(end) = content[start + 7..].find("```")
    {
        return content[start + 7..start + 7 + end].trim().to_string();
    }
    if let Some(start) = content.find("```")
        && let Some(end) = content[start + 3..].find("```")
    {
        let inner = content[start + 3..start + 3 + end].trim();
        if inner.starts_with('{') {
            return inner.to_string();
        }
    }
    if let Some(start) = content.find('{')
        && let Some(end) = content.rfind('}')
    {
        return content[start..=end].to_string();
    }
    content.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::DataProfile;

    fn params() -> NarrativeParams {
        NarrativeParams {
            title: "Q1 Review".to_string(),
            style: ReportStyle::Business,
            profile: DataProfile {
                row_count: 2,
                column_count: 1,
                columns: vec![],
                data_quality_score: 95,
                suggested_charts: vec![],
            },
            records: vec![],
            text_blocks: vec!["Background notes.".to_string()],
            instructions: Some("Focus on growth.".to_string()),
        }
    }

    #[test]
    fn test_extract_json_markdown_block() {
        let input = "Here is the report:\n```json\n{\"sections\": []}\n```\nDone.";
        assert_eq!(extract_json(input), "{\"sections\": []}");
    }

    #[test]
    fn test_extract_json_generic_code_block() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(extract_json(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_extract_json_embedded_in_text() {
        let input = "The result is {\"a\": 1} and that's it.";
        assert_eq!(extract_json(input), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_no_json() {
        let input = "No JSON here at all";
        assert_eq!(extract_json(input), input);
    }

    #[test]
    fn test_parse_narrative_valid() {
        let content = r#"{"executive_summary": "Sales grew.", "sections": [{"heading": "Growth", "content": "Up 12%."}], "recommendations": ["invest"], "key_findings": ["growth"]}"#;
        let narrative = parse_narrative_response(content);
        assert_eq!(narrative.executive_summary, "Sales grew.");
        assert_eq!(narrative.sections.len(), 1);
        assert_eq!(narrative.recommendations, vec!["invest"]);
        assert_eq!(narrative.key_findings, vec!["growth"]);
    }

    #[test]
    fn test_parse_narrative_partial_fields() {
        let content = r#"{"sections": [{"heading": "Only", "content": "section"}]}"#;
        let narrative = parse_narrative_response(content);
        assert_eq!(narrative.executive_summary, "Analysis of the provided data.");
        assert_eq!(narrative.sections.len(), 1);
        assert!(narrative.recommendations.is_empty());
    }

    #[test]
    fn test_parse_narrative_invalid_json_fallback() {
        let content = "This is prose, not JSON.";
        let narrative = parse_narrative_response(content);
        assert_eq!(narrative.sections.len(), 1);
        assert_eq!(narrative.sections[0].heading, "Analysis");
        assert_eq!(narrative.sections[0].content, content);
    }

    #[test]
    fn test_build_prompt_mentions_title_and_instructions() {
        let prompt = build_prompt(&params());
        assert!(prompt.contains("Q1 Review"));
        assert!(prompt.contains("Focus on growth."));
        assert!(prompt.contains("Background notes."));
        assert!(prompt.contains("quality score 95/100"));
    }

    #[test]
    fn test_system_prompt_varies_by_style() {
        let business = system_prompt(ReportStyle::Business);
        let technical = system_prompt(ReportStyle::Technical);
        assert_ne!(business, technical);
        assert!(business.contains("executives"));
    }
}
