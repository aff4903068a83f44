use crate::engine::{AnalyticsBackend, Milestone};
use crate::error::QueryError;
use crate::model::{format_date, QueryConfig, QueryParams, ResultRow};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use tokio::sync::mpsc::UnboundedSender;

/// HTTP client for the product-sales and sheet-sync endpoints.
#[derive(Clone)]
pub struct AnalyticsClient {
    http: Client,
    base_url: Url,
}

impl AnalyticsClient {
    pub fn new(cfg: &QueryConfig) -> Result<Self> {
        let mut base = cfg.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base).with_context(|| format!("invalid base URL {:?}", cfg.base_url))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // The session deadline bounds the request; no transport-level timeout here.
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .build()
            .context("build http client")?;

        Ok(Self { http, base_url })
    }

    pub fn sales_url(&self, params: &QueryParams) -> Url {
        let mut url = self.endpoint("product-sales");
        {
            let mut q = url.query_pairs_mut();
            for gid in params.product_gids() {
                q.append_pair("product_id", &gid);
            }
            q.append_pair("start_date", &format_date(params.start_date));
            q.append_pair("end_date", &format_date(params.end_date));
        }
        url
    }

    pub fn sheet_url(&self) -> Url {
        self.endpoint("update-googlesheet")
    }

    fn endpoint(&self, path: &str) -> Url {
        // Base always ends with '/', so join keeps any path prefix.
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    pub async fn fetch_product_sales(
        &self,
        params: &QueryParams,
        milestones: &UnboundedSender<Milestone>,
    ) -> Result<Vec<ResultRow>, QueryError> {
        let url = self.sales_url(params);
        tracing::debug!(%url, products = params.product_ids.len(), "requesting product sales");

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(backend_error(status, body));
        }
        let _ = milestones.send(Milestone::HeadersReceived);

        let body = resp.bytes().await?;
        let rows = parse_rows(&body)?;
        let _ = milestones.send(Milestone::BodyParsed { rows: rows.len() });
        Ok(rows)
    }

    pub async fn update_sheet(&self, rows: &[ResultRow]) -> Result<(), QueryError> {
        let url = self.sheet_url();
        tracing::debug!(%url, rows = rows.len(), "pushing rows to sheet");
        let resp = self.http.post(url).json(rows).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(backend_error(status, body));
        }
        Ok(())
    }
}

impl AnalyticsBackend for AnalyticsClient {
    fn fetch_product_sales<'a>(
        &'a self,
        params: &'a QueryParams,
        milestones: &'a UnboundedSender<Milestone>,
    ) -> BoxFuture<'a, Result<Vec<ResultRow>, QueryError>> {
        Box::pin(AnalyticsClient::fetch_product_sales(self, params, milestones))
    }

    fn update_sheet<'a>(&'a self, rows: &'a [ResultRow]) -> BoxFuture<'a, Result<(), QueryError>> {
        Box::pin(AnalyticsClient::update_sheet(self, rows))
    }
}

fn backend_error(status: reqwest::StatusCode, body: String) -> QueryError {
    let message = body.trim();
    let message = if message.is_empty() {
        status
            .canonical_reason()
            .map(|r| format!("HTTP {} {r}", status.as_u16()))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    } else {
        message.to_string()
    };
    QueryError::Backend {
        status: status.as_u16(),
        message,
    }
}

/// Decode a response body. An empty body or any non-array JSON value yields no rows.
pub fn parse_rows(body: &[u8]) -> Result<Vec<ResultRow>, QueryError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| QueryError::Decode(e.to_string()))?;
    match value {
        serde_json::Value::Array(_) => {
            serde_json::from_value(value).map_err(|e| QueryError::Decode(e.to_string()))
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(base_url: &str) -> QueryConfig {
        QueryConfig {
            base_url: base_url.to_string(),
            timeout: std::time::Duration::from_secs(300),
            user_agent: "product-sales-cli/test".into(),
        }
    }

    fn params() -> QueryParams {
        QueryParams {
            product_ids: vec!["101".into(), "202".into()],
            start_date: date!(2024 - 01 - 01),
            end_date: date!(2024 - 03 - 31),
        }
    }

    /// Serve a single canned HTTP response and hand back the raw request head.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut read = 0;
            // Read the head, then as much body as Content-Length announces.
            loop {
                let n = sock.read(&mut buf[read..]).await.unwrap();
                read += n;
                if n == 0 {
                    break;
                }
                let Some(head_end) = buf[..read].windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if read >= head_end + 4 + body_len {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            String::from_utf8_lossy(&buf[..read]).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_sales_url_repeats_product_ids() {
        let client = AnalyticsClient::new(&config("http://localhost:8000/api/")).unwrap();
        let url = client.sales_url(&params());
        assert_eq!(url.path(), "/api/product-sales");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("product_id".into(), "gid://shopify/Product/101".into()),
                ("product_id".into(), "gid://shopify/Product/202".into()),
                ("start_date".into(), "2024-01-01".into()),
                ("end_date".into(), "2024-03-31".into()),
            ]
        );
    }

    #[test]
    fn test_sheet_url_without_trailing_slash() {
        let client = AnalyticsClient::new(&config("http://localhost:8000/api")).unwrap();
        assert_eq!(
            client.sheet_url().as_str(),
            "http://localhost:8000/api/update-googlesheet"
        );
    }

    #[test]
    fn test_parse_rows_non_array_is_empty() {
        assert!(parse_rows(b"").unwrap().is_empty());
        assert!(parse_rows(b"null").unwrap().is_empty());
        assert!(parse_rows(br#"{"rows":[]}"#).unwrap().is_empty());
        assert!(matches!(parse_rows(b"<html>"), Err(QueryError::Decode(_))));
    }

    #[test]
    fn test_parse_rows_keeps_rows_with_null_fields() {
        let body = br#"[
            {"productTitle":"A","variantTitle":null,"sku":null,"netItemsSold":null,"netSales":"2.00"},
            {"productTitle":null,"variantTitle":"V","sku":"S","netItemsSold":"3","netSales":4.5}
        ]"#;
        let rows = parse_rows(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].variant_title, "");
        assert_eq!(rows[0].net_items_sold, 0);
        assert_eq!(rows[1].product_title, "");
        assert_eq!(rows[1].net_items_sold, 3);
    }

    #[tokio::test]
    async fn test_fetch_reports_milestones_and_rows() {
        let (base, server) = serve_once(
            "200 OK",
            r#"[{"productTitle":"A","variantTitle":"V1","sku":"S1","netItemsSold":3,"netSales":10.5}]"#,
        )
        .await;
        let client = AnalyticsClient::new(&config(&base)).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let rows = client.fetch_product_sales(&params(), &tx).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sku.as_deref(), Some("S1"));
        assert_eq!(rx.recv().await, Some(Milestone::HeadersReceived));
        assert_eq!(rx.recv().await, Some(Milestone::BodyParsed { rows: 1 }));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /product-sales?product_id=gid%3A%2F%2Fshopify%2FProduct%2F101&product_id="));
        assert!(request.to_ascii_lowercase().contains("accept: application/json"));
    }

    #[tokio::test]
    async fn test_non_success_uses_body_as_message() {
        let (base, _server) = serve_once("502 Bad Gateway", "upstream analytics unavailable").await;
        let client = AnalyticsClient::new(&config(&base)).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let err = client.fetch_product_sales(&params(), &tx).await.unwrap_err();
        assert_eq!(
            err,
            QueryError::Backend {
                status: 502,
                message: "upstream analytics unavailable".into()
            }
        );
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_update_sheet_posts_rows() {
        let (base, server) = serve_once("200 OK", "{}").await;
        let client = AnalyticsClient::new(&config(&base)).unwrap();
        let rows = vec![ResultRow {
            product_title: "A".into(),
            variant_title: "V".into(),
            sku: None,
            net_items_sold: 1,
            net_sales: 2.0,
        }];
        client.update_sheet(&rows).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /update-googlesheet "));
    }
}
