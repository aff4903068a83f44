//! CSV and JSON exports of a result set.

use crate::model::{QueryReport, ResultRow};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

pub const CSV_HEADER: [&str; 5] = [
    "Product Title",
    "Product Variant Title",
    "Product Variant SKU",
    "Net Items Sold",
    "Net Sales",
];

/// Render rows as CSV. Every field is quoted, embedded quotes are doubled,
/// a missing SKU is an empty quoted field and net sales carry two decimals.
pub fn render_csv(rows: &[ResultRow]) -> Result<String> {
    if rows.is_empty() {
        bail!("no data to export");
    }
    let mut w = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    w.write_record(CSV_HEADER).context("write csv header")?;
    for r in rows {
        let items = r.net_items_sold.to_string();
        let sales = format!("{:.2}", r.net_sales);
        w.write_record([
            r.product_title.as_str(),
            r.variant_title.as_str(),
            r.sku.as_deref().unwrap_or(""),
            items.as_str(),
            sales.as_str(),
        ])
        .context("write csv row")?;
    }
    let bytes = w.into_inner().context("flush csv")?;
    String::from_utf8(bytes).context("csv is not utf-8")
}

pub fn export_csv(path: &Path, rows: &[ResultRow]) -> Result<()> {
    let doc = render_csv(rows)?;
    write_file(path, doc.as_bytes())
}

pub fn export_json(path: &Path, report: &QueryReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("serialize report")?;
    write_file(path, &json)
}

/// `analytics-data-<timestamp>.csv`, timestamp in UTC.
pub fn default_csv_name(now: OffsetDateTime) -> String {
    format!("analytics-data-{}.csv", file_timestamp(now))
}

pub fn default_json_name(now: OffsetDateTime) -> String {
    format!("analytics-data-{}.json", file_timestamp(now))
}

/// Absolute path for a default-named export in the current directory.
pub fn default_export_path(file_name: &str) -> Result<PathBuf> {
    let current_dir = std::env::current_dir().context("get current directory")?;
    Ok(current_dir.join(file_name))
}

fn file_timestamp(now: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    now.to_offset(time::UtcOffset::UTC)
        .format(fmt)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn rows() -> Vec<ResultRow> {
        vec![
            ResultRow {
                product_title: "Mug, \"Large\"".into(),
                variant_title: "Blue".into(),
                sku: Some("MUG-\"L\"".into()),
                net_items_sold: 3,
                net_sales: 10.5,
            },
            ResultRow {
                product_title: "Mug".into(),
                variant_title: "Red".into(),
                sku: None,
                net_items_sold: 0,
                net_sales: 0.0,
            },
        ]
    }

    #[test]
    fn test_empty_export_is_rejected() {
        assert!(render_csv(&[]).is_err());
    }

    #[test]
    fn test_every_field_quoted_and_quotes_doubled() {
        let doc = render_csv(&rows()).unwrap();
        let lines: Vec<&str> = doc.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            r#""Product Title","Product Variant Title","Product Variant SKU","Net Items Sold","Net Sales""#
        );
        assert_eq!(
            lines[1],
            r#""Mug, ""Large""","Blue","MUG-""L""","3","10.50""#
        );
        assert_eq!(lines[2], r#""Mug","Red","","0","0.00""#);
    }

    #[test]
    fn test_csv_round_trips_through_reader() {
        let src = rows();
        let doc = render_csv(&src).unwrap();
        let mut reader = csv::Reader::from_reader(doc.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_HEADER.to_vec());

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), src.len());
        for (rec, row) in records.iter().zip(&src) {
            assert_eq!(&rec[0], row.product_title);
            assert_eq!(&rec[1], row.variant_title);
            assert_eq!(&rec[2], row.sku.as_deref().unwrap_or(""));
            assert_eq!(rec[3].parse::<i64>().unwrap(), row.net_items_sold);
            assert_eq!(&rec[4], format!("{:.2}", row.net_sales));
        }
    }

    #[test]
    fn test_default_file_name_uses_utc_timestamp() {
        let now = datetime!(2024-03-05 14:07:09 +2);
        assert_eq!(
            default_csv_name(now),
            "analytics-data-2024-03-05_12-07-09.csv"
        );
    }

    #[test]
    fn test_export_csv_writes_file() {
        let dir = std::env::temp_dir().join(format!("product-sales-cli-test-{}", std::process::id()));
        let path = dir.join("out.csv");
        export_csv(&path, &rows()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("\"Product Title\""));
        std::fs::remove_dir_all(&dir).ok();
    }
}
