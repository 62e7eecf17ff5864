use base64::Engine;
use serde_json::Value;

use crate::error::AppError;
use crate::model::InputBlock;

use super::Record;

/// Parses every structured block into flat records and concatenates them
/// row-wise. Missing keys are filled with null so every record carries the
/// union schema. Text blocks pass through verbatim as separate strings.
pub fn normalize_blocks(blocks: &[InputBlock]) -> Result<(Vec<Record>, Vec<String>), AppError> {
    let mut records: Vec<Record> = Vec::new();
    let mut text_blocks: Vec<String> = Vec::new();

    for (index, block) in blocks.iter().enumerate() {
        match block {
            InputBlock::Records { records: rows } => {
                for row in rows {
                    match row {
                        Value::Object(map) => records.push(map.clone()),
                        other => {
                            return Err(AppError::Validation(format!(
                                "input block {index}: records must be objects, got {other}"
                            )));
                        }
                    }
                }
            }
            InputBlock::Csv { content } => {
                records.extend(parse_csv(content, index)?);
            }
            InputBlock::Spreadsheet { content } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(content.trim())
                    .map_err(|e| {
                        AppError::Validation(format!(
                            "input block {index}: invalid base64 payload: {e}"
                        ))
                    })?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    AppError::Validation(format!(
                        "input block {index}: spreadsheet payload is not valid UTF-8"
                    ))
                })?;
                records.extend(parse_csv(&text, index)?);
            }
            InputBlock::Text { content } => {
                text_blocks.push(content.clone());
            }
        }
    }

    let columns = column_order(&records);
    for record in &mut records {
        for column in &columns {
            record.entry(column.clone()).or_insert(Value::Null);
        }
    }

    Ok((records, text_blocks))
}

/// Column names in first-seen order across the whole record set.
pub fn column_order(records: &[Record]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !order.iter().any(|k| k == key) {
                order.push(key.clone());
            }
        }
    }
    order
}

fn parse_csv(content: &str, block_index: usize) -> Result<Vec<Record>, AppError> {
    let rows = split_csv_rows(content);
    let mut rows = rows.into_iter();

    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    if header.iter().all(|h| h.trim().is_empty()) {
        return Err(AppError::Validation(format!(
            "input block {block_index}: CSV header row is empty"
        )));
    }

    let mut records = Vec::new();
    for fields in rows {
        if fields.len() == 1 && fields[0].trim().is_empty() {
            continue;
        }
        let mut record = Record::new();
        for (i, name) in header.iter().enumerate() {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = fields.get(i).map(|f| f.as_str()).unwrap_or("");
            record.insert(name.to_string(), csv_value(value));
        }
        records.push(record);
    }
    Ok(records)
}

fn csv_value(field: &str) -> Value {
    if field.trim().is_empty() {
        Value::Null
    } else {
        Value::String(field.to_string())
    }
}

/// Minimal CSV reader: comma-separated, double-quoted fields with `""`
/// escapes, newlines allowed inside quotes.
fn split_csv_rows(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => row.push(std::mem::take(&mut field)),
                '\r' => {}
                '\n' => {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                _ => field.push(c),
            }
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}
