//! Text summary builder for CLI output.
//!
//! Formats the summary block and a fixed-width row table for text mode.

use crate::model::{format_date, QueryReport};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

const TITLE_WIDTH: usize = 32;
const VARIANT_WIDTH: usize = 24;
const SKU_WIDTH: usize = 16;

/// Build a text summary from a completed report.
pub(crate) fn build_text_summary(report: &QueryReport) -> TextSummary {
    let mut lines = Vec::new();
    let q = &report.query;
    let s = &report.summary;

    lines.push(format!(
        "Products: {} ({} to {})",
        q.product_ids.join(", "),
        format_date(q.start_date),
        format_date(q.end_date)
    ));
    lines.push(format!(
        "Unique products: {}  Items sold: {}  Net sales: {:.2}  Avg per item: {:.2}",
        s.unique_products, s.total_items_sold, s.total_sales, s.average_sale_per_item
    ));

    if report.rows.is_empty() {
        lines.push("No sales found for this query.".into());
        return TextSummary { lines };
    }

    lines.push(String::new());
    lines.push(format!(
        "{:<tw$} {:<vw$} {:<sw$} {:>8} {:>12}",
        "Product",
        "Variant",
        "SKU",
        "Items",
        "Net sales",
        tw = TITLE_WIDTH,
        vw = VARIANT_WIDTH,
        sw = SKU_WIDTH
    ));
    for r in &report.rows {
        lines.push(format!(
            "{:<tw$} {:<vw$} {:<sw$} {:>8} {:>12.2}",
            truncate(&r.product_title, TITLE_WIDTH),
            truncate(&r.variant_title, VARIANT_WIDTH),
            truncate(r.sku.as_deref().unwrap_or("-"), SKU_WIDTH),
            r.net_items_sold,
            r.net_sales,
            tw = TITLE_WIDTH,
            vw = VARIANT_WIDTH,
            sw = SKU_WIDTH
        ));
    }

    TextSummary { lines }
}

/// Cut to `max` characters, marking the cut with an ellipsis.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::summarize;
    use crate::model::{QueryParams, ResultRow};
    use std::time::Duration;
    use time::macros::date;

    fn report(rows: Vec<ResultRow>) -> QueryReport {
        QueryReport {
            generated_at_utc: "2024-01-01T00:00:00Z".into(),
            base_url: "http://localhost".into(),
            timeout: Duration::from_secs(300),
            query: QueryParams {
                product_ids: vec!["1".into(), "2".into()],
                start_date: date!(2024 - 01 - 01),
                end_date: date!(2024 - 03 - 31),
            },
            summary: summarize(&rows),
            rows,
        }
    }

    #[test]
    fn test_summary_lines_with_rows() {
        let rows = vec![ResultRow {
            product_title: "A very long product title that will not fit".into(),
            variant_title: "Default".into(),
            sku: None,
            net_items_sold: 4,
            net_sales: 12.0,
        }];
        let out = build_text_summary(&report(rows));
        assert_eq!(out.lines[0], "Products: 1, 2 (2024-01-01 to 2024-03-31)");
        assert!(out.lines[1].contains("Net sales: 12.00"));
        assert!(out.lines[1].contains("Avg per item: 3.00"));
        let last = out.lines.last().unwrap();
        assert!(last.contains('…'));
        assert!(last.trim_end().ends_with("12.00"));
    }

    #[test]
    fn test_empty_result_message() {
        let out = build_text_summary(&report(Vec::new()));
        assert_eq!(out.lines.last().unwrap(), "No sales found for this query.");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("héllo", 5), "héllo");
        assert_eq!(truncate("héllo wörld", 6), "héllo…");
    }
}
