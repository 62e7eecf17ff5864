use crate::error::AppError;
use crate::model::OutputFormat;

use super::{DocumentRenderer, RenderContext, RenderedDocument};

/// HTML export is the assembled layout verbatim.
pub struct HtmlExporter;

#[async_trait::async_trait]
impl DocumentRenderer for HtmlExporter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Html
    }

    async fn render(&self, ctx: &RenderContext<'_>) -> Result<RenderedDocument, AppError> {
        Ok(RenderedDocument {
            bytes: ctx.layout_html.as_bytes().to_vec(),
        })
    }
}

/// Word-compatible HTML export. Word opens HTML documents carrying its
/// Office namespaces natively, which keeps this exporter dependency-free.
pub struct DocxExporter;

#[async_trait::async_trait]
impl DocumentRenderer for DocxExporter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Docx
    }

    async fn render(&self, ctx: &RenderContext<'_>) -> Result<RenderedDocument, AppError> {
        let html = ctx.layout_html.replacen(
            "<html>",
            "<html xmlns:o=\"urn:schemas-microsoft-com:office:office\" \
             xmlns:w=\"urn:schemas-microsoft-com:office:word\">",
            1,
        );
        Ok(RenderedDocument {
            bytes: html.into_bytes(),
        })
    }
}

/// Text-only PDF 1.4 export built from the narrative. Charts stay in the
/// HTML and DOCX renditions.
pub struct PdfExporter;

#[async_trait::async_trait]
impl DocumentRenderer for PdfExporter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Pdf
    }

    async fn render(&self, ctx: &RenderContext<'_>) -> Result<RenderedDocument, AppError> {
        let mut lines = vec![ctx.report.title.clone(), String::new()];
        lines.push("Executive summary".to_string());
        wrap_into(&mut lines, &ctx.narrative.executive_summary);
        if !ctx.narrative.key_findings.is_empty() {
            lines.push(String::new());
            lines.push("Key findings".to_string());
            for finding in &ctx.narrative.key_findings {
                wrap_into(&mut lines, &format!("- {finding}"));
            }
        }
        for section in &ctx.narrative.sections {
            lines.push(String::new());
            lines.push(section.heading.clone());
            for paragraph in section.content.split("\n\n") {
                wrap_into(&mut lines, paragraph.trim());
            }
        }
        if !ctx.narrative.recommendations.is_empty() {
            lines.push(String::new());
            lines.push("Recommendations".to_string());
            for (i, recommendation) in ctx.narrative.recommendations.iter().enumerate() {
                wrap_into(&mut lines, &format!("{}. {recommendation}", i + 1));
            }
        }
        Ok(RenderedDocument {
            bytes: build_pdf(&lines),
        })
    }
}

const WRAP_COLUMNS: usize = 92;
const LINES_PER_PAGE: usize = 54;

fn wrap_into(lines: &mut Vec<String>, text: &str) {
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > WRAP_COLUMNS {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
}

fn pdf_escape(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

/// Hand-assembled PDF 1.4 with one content stream per page and a shared
/// Helvetica font object.
fn build_pdf(lines: &[String]) -> Vec<u8> {
    let pages: Vec<&[String]> = lines.chunks(LINES_PER_PAGE).collect();
    let page_count = pages.len().max(1);

    // Object layout: 1 catalog, 2 pages root, 3 font, then for each page
    // object 4+2i is the page and 5+2i its content stream.
    let mut objects: Vec<String> = Vec::new();
    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect();

    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {page_count} >>",
        kids.join(" ")
    ));
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    );

    for i in 0..page_count {
        let empty: &[String] = &[];
        let page_lines = pages.get(i).copied().unwrap_or(empty);
        let mut stream = String::from("BT /F1 11 Tf 50 780 Td 14 TL\n");
        for line in page_lines {
            stream.push_str(&format!("({}) Tj T*\n", pdf_escape(line)));
        }
        stream.push_str("ET");

        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            5 + 2 * i
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{stream}\nendstream",
            stream.len()
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{object}\nendobj\n", i + 1));
    }

    let xref_offset = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for offset in &offsets {
        out.push_str(&format!("{offset:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
        objects.len() + 1
    ));
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Narrative, NarrativeSection};
    use crate::model::{Report, ReportStyle};
    use crate::profiler::DataProfile;
    use crate::render::RenderContext;

    fn narrative() -> Narrative {
        Narrative {
            executive_summary: "Numbers (mostly) up.".to_string(),
            sections: vec![NarrativeSection {
                heading: "Detail".to_string(),
                content: "Lots of words ".repeat(40),
            }],
            recommendations: vec!["Act".to_string()],
            key_findings: vec!["Finding".to_string()],
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
    async fn test_html_exporter_passes_layout_through() {
        let report = Report::new("T", ReportStyle::Business, vec![OutputFormat::Html]);
        let narrative = narrative();
        let profile = profile();
        let ctx = RenderContext {
            report: &report,
            narrative: &narrative,
            charts: &[],
            profile: &profile,
            layout_html: "<html><body>x</body></html>",
        };
        let doc = HtmlExporter.render(&ctx).await.unwrap();
        assert_eq!(doc.bytes, b"<html><body>x</body></html>");
    }

    #[tokio::test]
    async fn test_docx_exporter_injects_word_namespaces() {
        let report = Report::new("T", ReportStyle::Business, vec![OutputFormat::Docx]);
        let narrative = narrative();
        let profile = profile();
        let ctx = RenderContext {
            report: &report,
            narrative: &narrative,
            charts: &[],
            profile: &profile,
            layout_html: "<html><body>x</body></html>",
        };
        let doc = DocxExporter.render(&ctx).await.unwrap();
        let html = String::from_utf8(doc.bytes).unwrap();
        assert!(html.contains("urn:schemas-microsoft-com:office:word"));
    }

    #[tokio::test]
    async fn test_pdf_exporter_emits_valid_skeleton() {
        let report = Report::new("Quarterly", ReportStyle::Business, vec![OutputFormat::Pdf]);
        let narrative = narrative();
        let profile = profile();
        let ctx = RenderContext {
            report: &report,
            narrative: &narrative,
            charts: &[],
            profile: &profile,
            layout_html: "",
        };
        let doc = PdfExporter.render(&ctx).await.unwrap();
        let text = String::from_utf8(doc.bytes).unwrap();
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.ends_with("%%EOF\n"));
        assert!(text.contains("(Quarterly) Tj"));
        assert!(text.contains("\\(mostly\\)"));
    }

    #[test]
    fn test_wrap_respects_column_limit() {
        let mut lines = Vec::new();
        wrap_into(&mut lines, &"word ".repeat(60));
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= WRAP_COLUMNS));
    }
}
