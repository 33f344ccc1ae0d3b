use prettytable::format::{FormatBuilder, LinePosition, LineSeparator};
use prettytable::{Cell, Row};
use serde::Serialize;
use serde_json::{Map, Value};

/// Rows of one report, printable as a table or as JSON objects keyed by
/// column title.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    file: &'a str,
    report: &'a str,
    rows: Vec<Map<String, Value>>,
}

impl Table {
    pub fn new(columns: &[&'static str]) -> Self {
        Self {
            columns: columns.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Two-column name/value listing.
    pub fn field(&mut self, name: &str, value: String) {
        self.rows.push(vec![name.to_string(), value]);
    }

    pub fn print(&self) {
        let mut table = prettytable::Table::new();
        table.set_format(
            FormatBuilder::new()
                .separator(LinePosition::Title,  LineSeparator::new('-', '+', '+', '+'))
                .separator(LinePosition::Bottom, LineSeparator::new('-', '+', '+', '+'))
                .separator(LinePosition::Top,    LineSeparator::new('-', '+', '+', '+'))
                .padding(1, 1)
                .build());
        table.set_titles(Row::new(self.columns.iter().map(|c| Cell::new(c)).collect()));
        for r in &self.rows {
            table.add_row(Row::new(r.iter().map(|c| Cell::new(c)).collect()));
        }
        table.printstd();
    }

    pub fn to_json(&self, file: &str, report: &str) -> serde_json::Result<String> {
        let rows = self.rows.iter()
            .map(|r| {
                self.columns.iter()
                    .zip(r.iter())
                    .map(|(c, v)| (c.to_string(), Value::String(v.clone())))
                    .collect()
            })
            .collect();
        serde_json::to_string_pretty(&JsonReport { file, report, rows })
    }
}
