//! Plain-text tables for aggregation output.

use std::{borrow::Cow, fmt::Write as _};

use crate::{
    aggregate::{AggregateResult, DrilldownRow, ViewResult},
    taxonomy::ClassifierEntry,
};

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count().max(1)).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat((*w).max(3))).collect();
    let separator_widths: Vec<usize> = widths.iter().map(|w| (*w).max(3)).collect();
    let _ = writeln!(output, "{}", format_row(&separator, &separator_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", sanitize_cell(value), width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn format_amount(value: f64) -> String {
    format!("{value:.2}")
}

fn drilldown_cells(row: &DrilldownRow) -> Vec<String> {
    row.keys
        .iter()
        .map(|key| key.as_display())
        .chain(row.totals.iter().map(|total| format_amount(*total)))
        .chain(std::iter::once(row.num_entries.to_string()))
        .collect()
}

fn drilldown_headers(keys: &[String], measures: &[String]) -> Vec<String> {
    keys.iter()
        .chain(measures)
        .cloned()
        .chain(std::iter::once("num_entries".to_string()))
        .collect()
}

pub fn render_view(result: &ViewResult) -> String {
    let headers = drilldown_headers(std::slice::from_ref(&result.breakdown), &result.measures);
    let rows: Vec<Vec<String>> = result.rows.iter().map(drilldown_cells).collect();
    render_table(&headers, &rows)
}

pub fn render_aggregate(result: &AggregateResult) -> String {
    let headers = drilldown_headers(&result.drilldowns, &result.measures);
    let rows: Vec<Vec<String>> = result.rows.iter().map(drilldown_cells).collect();
    let mut output = render_table(&headers, &rows);
    let summary = &result.summary;
    let totals = summary
        .totals
        .iter()
        .map(|(name, total)| format!("{name}={}", format_amount(*total)))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(
        output,
        "\n{totals}; {} entr(ies) in {} group(s); page {}/{} ({} per page)",
        summary.num_entries, summary.num_drilldowns, summary.page, summary.pages, summary.pagesize
    );
    output
}

pub fn render_members(entries: &[&ClassifierEntry]) -> String {
    let headers: Vec<String> = ["name", "label", "description", "change_date"]
        .into_iter()
        .map(String::from)
        .collect();
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|entry| {
            vec![
                entry.name.clone(),
                entry.label.clone(),
                entry.description.clone(),
                entry.change_date.clone(),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}
