use comfy_table::{ContentArrangement, Table, presets};

use crate::config::OutputFormat;
use crate::db::types::{ResultSet, Value};

const NULL_DISPLAY: &str = "—";
const ELLIPSIS: &str = "…";
const DEFAULT_MAX_CELL_WIDTH: usize = 140;

#[derive(Debug, Clone)]
pub struct TableOptions {
    pub max_cell_width: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            max_cell_width: DEFAULT_MAX_CELL_WIDTH,
        }
    }
}

fn new_table(format: OutputFormat) -> Table {
    let mut table = Table::new();
    match format {
        OutputFormat::Markdown => {
            table.load_preset(presets::ASCII_MARKDOWN);
        }
        _ => {
            table.load_preset(presets::UTF8_FULL);
        }
    }
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn render_result_set_table(
    result_set: &ResultSet,
    format: OutputFormat,
    options: &TableOptions,
) -> String {
    let mut table = new_table(format);

    let headers = result_set
        .columns
        .iter()
        .map(|col| col.name.clone())
        .collect::<Vec<_>>();
    table.set_header(headers);

    for row in &result_set.rows {
        let cells = row
            .iter()
            .map(|value| format_cell(value, options.max_cell_width))
            .collect::<Vec<_>>();
        table.add_row(cells);
    }

    table.to_string()
}

pub fn render_key_value_table(
    title: &str,
    rows: &[(String, String)],
    format: OutputFormat,
    options: &TableOptions,
) -> String {
    let mut table = new_table(format);
    table.set_header(vec![title.to_string(), "Value".to_string()]);

    for (key, value) in rows {
        let key = truncate_string(key, options.max_cell_width);
        let value = truncate_string(value, options.max_cell_width);
        table.add_row(vec![key, value]);
    }

    table.to_string()
}

fn format_cell(value: &Value, max_cell_width: usize) -> String {
    let raw = match value {
        Value::Null => NULL_DISPLAY.to_string(),
        _ => value.as_display(),
    };
    truncate_string(&raw, max_cell_width)
}

fn truncate_string(input: &str, max_len: usize) -> String {
    let len = input.chars().count();
    if len <= max_len {
        return input.to_string();
    }
    if max_len <= 1 {
        return ELLIPSIS.to_string();
    }
    let truncated: String = input.chars().take(max_len - 1).collect();
    format!("{}{}", truncated, ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::Column;

    fn single(value: Value) -> ResultSet {
        ResultSet {
            columns: vec![Column {
                name: "abs_diff".to_string(),
                data_type: None,
            }],
            rows: vec![vec![value]],
        }
    }

    #[test]
    fn truncates_cells() {
        let value = Value::Text("abcdefghijklmnopqrstuvwxyz".to_string());
        let out = format_cell(&value, 8);
        assert_eq!(out, "abcdefg…");
    }

    #[test]
    fn renders_null_display() {
        let out = render_result_set_table(
            &single(Value::Null),
            OutputFormat::Pretty,
            &TableOptions::default(),
        );
        assert!(out.contains("—"));
    }

    #[test]
    fn markdown_uses_pipes() {
        let out = render_result_set_table(
            &single(Value::Int(1500)),
            OutputFormat::Markdown,
            &TableOptions::default(),
        );
        assert!(out.contains("| abs_diff"));
        assert!(out.contains("1,500"));
    }
}
