//! Post-query processing utilities.
//!
//! Builds the summary/report for a completed query and runs the exports
//! requested on the command line.

use crate::export;
use crate::metrics;
use crate::model::{QueryConfig, QueryParams, QueryReport, ResultRow};
use std::path::PathBuf;

/// Export destinations requested up front (CLI flags).
#[derive(Debug, Clone, Default)]
pub(crate) struct ExportTargets {
    /// `Some(None)` means "export with the default timestamped name".
    pub csv: Option<Option<PathBuf>>,
    pub json: Option<PathBuf>,
}

/// Result of post-query processing, ready for presentation layers.
pub(crate) struct ProcessedQuery {
    pub report: QueryReport,
    pub export_messages: Vec<String>,
}

/// Process a completed query: summarize and export.
pub(crate) fn process_completion(
    cfg: &QueryConfig,
    targets: &ExportTargets,
    params: QueryParams,
    rows: Vec<ResultRow>,
) -> ProcessedQuery {
    let now = time::OffsetDateTime::now_utc();
    let report = QueryReport {
        generated_at_utc: now
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        base_url: cfg.base_url.clone(),
        timeout: cfg.timeout,
        query: params,
        summary: metrics::summarize(&rows),
        rows,
    };

    let mut export_messages = Vec::new();
    if let Some(csv_target) = targets.csv.as_ref() {
        let path = match csv_target {
            Some(p) => Ok(p.clone()),
            None => export::default_export_path(&export::default_csv_name(now)),
        };
        match path.and_then(|p| export::export_csv(&p, &report.rows).map(|_| p)) {
            Ok(p) => export_messages.push(format!("Exported CSV: {}", p.display())),
            Err(e) => export_messages.push(format!("Export CSV failed: {e:#}")),
        }
    }
    if let Some(export_path) = targets.json.as_deref() {
        match export::export_json(export_path, &report) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedQuery {
        report,
        export_messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::macros::date;

    #[test]
    fn test_empty_result_skips_csv_with_message() {
        let cfg = QueryConfig {
            base_url: "http://localhost".into(),
            timeout: Duration::from_secs(300),
            user_agent: "test".into(),
        };
        let targets = ExportTargets {
            csv: Some(Some(std::env::temp_dir().join("never-written.csv"))),
            json: None,
        };
        let params = QueryParams {
            product_ids: vec!["1".into()],
            start_date: date!(2024 - 01 - 01),
            end_date: date!(2024 - 01 - 02),
        };
        let processed = process_completion(&cfg, &targets, params, Vec::new());
        assert_eq!(processed.report.summary.unique_products, 0);
        assert_eq!(processed.export_messages.len(), 1);
        assert!(processed.export_messages[0].starts_with("Export CSV failed: no data to export"));
    }
}
