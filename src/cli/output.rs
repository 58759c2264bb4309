//! Rendering of command results as pretty JSON or a plain text table.

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

/// Longest cell printed in table mode.
const MAX_CELL: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

pub fn render(value: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Table => Ok(render_table(value)),
    }
}

/// Serialize and print to stdout.
pub fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let value = serde_json::to_value(value)?;
    println!("{}", render(&value, format)?);
    Ok(())
}

fn cell(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_CELL {
        let cut: String = text.chars().take(MAX_CELL - 3).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn render_table(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let rows: Vec<Vec<String>> = map.iter().map(|(k, v)| vec![k.clone(), cell(v)]).collect();
            layout(&["key".to_string(), "value".to_string()], &rows)
        }
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            let mut columns: Vec<String> = Vec::new();
            for item in items {
                if let Value::Object(map) = item {
                    for key in map.keys() {
                        if !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                }
            }
            let rows: Vec<Vec<String>> = items
                .iter()
                .map(|item| columns.iter().map(|c| cell(&item[c.as_str()])).collect())
                .collect();
            layout(&columns, &rows)
        }
        Value::Array(items) => {
            let rows: Vec<Vec<String>> = items
                .iter()
                .enumerate()
                .map(|(i, v)| vec![i.to_string(), cell(v)])
                .collect();
            layout(&["index".to_string(), "value".to_string()], &rows)
        }
        scalar => cell(scalar),
    }
}

fn layout(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, text) in row.iter().enumerate() {
            widths[i] = widths[i].max(text.chars().count());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(text, width)| format!("{:<width$}", text, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(headers)];
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    out.extend(rows.iter().map(|row| line(row.as_slice())));
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_renders_key_value_rows() {
        let out = render(&json!({"price": 190.5, "symbol": "AAPL"}), OutputFormat::Table).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "key     value");
        assert_eq!(lines[2], "price   190.5");
        assert_eq!(lines[3], "symbol  AAPL");
    }

    #[test]
    fn test_array_of_objects_renders_one_row_each() {
        let value = json!([
            {"date": "2024-01-01", "value": 5.33},
            {"date": "2024-01-02", "value": null}
        ]);
        let out = render(&value, OutputFormat::Table).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "date        value");
        assert_eq!(lines[2], "2024-01-01  5.33");
        assert_eq!(lines[3], "2024-01-02");
    }

    #[test]
    fn test_long_cells_are_truncated() {
        let long = "x".repeat(200);
        let out = render(&json!({ "note": long }), OutputFormat::Table).unwrap();
        assert!(out.lines().nth(2).unwrap().ends_with("..."));
        assert!(out.lines().nth(2).unwrap().chars().count() < 80);
    }

    #[test]
    fn test_json_is_pretty() {
        let out = render(&json!({"a": 1}), OutputFormat::Json).unwrap();
        assert_eq!(out, "{\n  \"a\": 1\n}");
    }
}
