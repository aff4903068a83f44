use crate::error::QueryError;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use time::macros::format_description;
use time::Date;

/// Prefix the backend expects on product identifiers.
pub const PRODUCT_GID_PREFIX: &str = "gid://shopify/Product/";

/// Calendar date format used on the wire and in form inputs.
pub const DATE_FORMAT: &[time::format_description::FormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

/// Length of the default trailing date window.
pub const DEFAULT_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    pub product_ids: Vec<String>,
    #[serde(with = "iso_date")]
    pub start_date: Date,
    #[serde(with = "iso_date")]
    pub end_date: Date,
}

impl QueryParams {
    /// Parse raw form text into validated parameters.
    ///
    /// Identifiers are comma separated; fragments are trimmed and empty ones
    /// dropped. Duplicates are kept. The end date is not checked against the
    /// start date.
    pub fn parse(ids_text: &str, start_text: &str, end_text: &str) -> Result<Self, QueryError> {
        let product_ids = parse_product_ids(ids_text);
        if product_ids.is_empty() {
            return Err(QueryError::Validation(
                "enter at least one product ID".into(),
            ));
        }
        let start_date = parse_date("start date", start_text)?;
        let end_date = parse_date("end date", end_text)?;
        Ok(Self {
            product_ids,
            start_date,
            end_date,
        })
    }

    /// Identifiers in the GID form the backend matches on.
    pub fn product_gids(&self) -> Vec<String> {
        self.product_ids.iter().map(|id| to_product_gid(id)).collect()
    }
}

/// Split comma-separated identifier text into a trimmed, non-empty sequence.
pub fn parse_product_ids(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_date(field: &str, text: &str) -> Result<Date, QueryError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(QueryError::Validation(format!("{field} is required")));
    }
    Date::parse(text, DATE_FORMAT)
        .map_err(|_| QueryError::Validation(format!("{field} must be YYYY-MM-DD, got {text:?}")))
}

pub fn format_date(d: Date) -> String {
    d.format(DATE_FORMAT)
        .unwrap_or_else(|_| d.to_string())
}

/// Bare numeric ids get the product GID prefix; ids already in GID form pass through.
pub fn to_product_gid(id: &str) -> String {
    if id.starts_with("gid://") {
        id.to_string()
    } else {
        format!("{PRODUCT_GID_PREFIX}{id}")
    }
}

/// Default date range: the trailing window ending on `today`.
pub fn default_date_range(today: Date) -> (Date, Date) {
    let start = today
        .checked_sub(time::Duration::days(DEFAULT_WINDOW_DAYS))
        .unwrap_or(today);
    (start, today)
}

/// Today's date in the local timezone, falling back to UTC.
pub fn local_today() -> Date {
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .date()
}

mod iso_date {
    use super::{format_date, DATE_FORMAT};
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(d: &Date, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_date(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(d)?;
        Date::parse(&raw, DATE_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// One product-variant sales record returned by the analytics backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub product_title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub variant_title: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default, deserialize_with = "count_or_string")]
    pub net_items_sold: i64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub net_sales: f64,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn count_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
        Null(()),
    }
    match Raw::deserialize(d)? {
        Raw::Int(n) => Ok(n),
        Raw::Str(s) if s.trim().is_empty() => Ok(0),
        Raw::Str(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
        Raw::Null(()) => Ok(0),
    }
}

// Money amounts sometimes arrive as strings ("10.50").
fn number_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
        Null(()),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) if s.trim().is_empty() => Ok(0.0),
        Raw::Str(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
        Raw::Null(()) => Ok(0.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    FetchingProducts,
    FetchingSales,
    Processing,
    Complete,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::FetchingProducts => "Fetching products",
            Phase::FetchingSales => "Fetching sales",
            Phase::Processing => "Processing",
            Phase::Complete => "Complete",
        }
    }

    /// A request is outstanding in this phase.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Phase::FetchingProducts | Phase::FetchingSales | Phase::Processing
        )
    }
}

/// Read-only view of the session state sent to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub progress: u8,
    pub elapsed_secs: u64,
    pub estimated_secs: u64,
    pub total_products: usize,
    pub processed_products: usize,
    pub status: String,
}

/// Events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Progress(SessionSnapshot),
    Completed {
        params: QueryParams,
        rows: Vec<ResultRow>,
    },
    Failed(QueryError),
    Cancelled,
    /// Submission refused before any network call.
    Rejected(QueryError),
    Info(InfoEvent),
}

/// Structured notices emitted by the controller.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    SheetSynced { rows: usize },
    SheetSyncFailed(String),
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::SheetSynced { rows } => {
                format!("Google Sheet updated with {rows} row(s)")
            }
            InfoEvent::SheetSyncFailed(e) => format!("Sheet update failed: {e}"),
        }
    }
}

/// Aggregates over a result set.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SalesSummary {
    pub unique_products: usize,
    pub total_items_sold: i64,
    pub total_sales: f64,
    pub average_sale_per_item: f64,
}

/// Settings for one query run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub user_agent: String,
}

/// Envelope written by `--json` and JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub generated_at_utc: String,
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub query: QueryParams,
    pub summary: SalesSummary,
    pub rows: Vec<ResultRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_parse_trims_and_drops_empty_ids() {
        let p = QueryParams::parse(" 101, ,202 ,101,", "2024-01-01", "2024-03-31").unwrap();
        assert_eq!(p.product_ids, vec!["101", "202", "101"]);
        assert_eq!(p.start_date, date!(2024 - 01 - 01));
        assert_eq!(p.end_date, date!(2024 - 03 - 31));
    }

    #[test]
    fn test_parse_rejects_empty_ids() {
        let err = QueryParams::parse(" , ", "2024-01-01", "2024-01-02").unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_parse_requires_both_dates() {
        assert!(matches!(
            QueryParams::parse("1", "", "2024-01-02"),
            Err(QueryError::Validation(_))
        ));
        assert!(matches!(
            QueryParams::parse("1", "2024-01-01", "01/02/2024"),
            Err(QueryError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_allows_end_before_start() {
        let p = QueryParams::parse("1", "2024-05-01", "2024-01-01").unwrap();
        assert!(p.end_date < p.start_date);
    }

    #[test]
    fn test_product_gid_prefixing() {
        assert_eq!(to_product_gid("42"), "gid://shopify/Product/42");
        assert_eq!(
            to_product_gid("gid://shopify/Product/42"),
            "gid://shopify/Product/42"
        );
    }

    #[test]
    fn test_default_date_range_is_ninety_days() {
        let (start, end) = default_date_range(date!(2024 - 04 - 30));
        assert_eq!(end, date!(2024 - 04 - 30));
        assert_eq!(start, date!(2024 - 01 - 31));
    }

    #[test]
    fn test_result_row_accepts_string_money_and_null_sku() {
        let row: ResultRow = serde_json::from_str(
            r#"{"productTitle":"A","variantTitle":"V","sku":null,"netItemsSold":2,"netSales":"4.50"}"#,
        )
        .unwrap();
        assert_eq!(row.sku, None);
        assert_eq!(row.net_sales, 4.5);
    }

    #[test]
    fn test_result_row_tolerates_null_titles_and_counts() {
        let row: ResultRow = serde_json::from_str(
            r#"{"productTitle":null,"variantTitle":null,"sku":"S","netItemsSold":null,"netSales":null}"#,
        )
        .unwrap();
        assert_eq!(row.product_title, "");
        assert_eq!(row.variant_title, "");
        assert_eq!(row.net_items_sold, 0);
        assert_eq!(row.net_sales, 0.0);

        let row: ResultRow =
            serde_json::from_str(r#"{"productTitle":"A","netItemsSold":"3"}"#).unwrap();
        assert_eq!(row.net_items_sold, 3);
        assert_eq!(row.variant_title, "");
    }
}
