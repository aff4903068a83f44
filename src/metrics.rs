use crate::model::{ResultRow, SalesSummary};
use std::collections::HashSet;

/// Aggregate a result set: distinct product titles, items sold, net sales and
/// average sale per item (zero when nothing was sold).
pub fn summarize(rows: &[ResultRow]) -> SalesSummary {
    let unique_products = rows
        .iter()
        .map(|r| r.product_title.as_str())
        .collect::<HashSet<_>>()
        .len();
    let total_items_sold: i64 = rows.iter().map(|r| r.net_items_sold).sum();
    let total_sales: f64 = rows.iter().map(|r| r.net_sales).sum();
    let average_sale_per_item = if total_items_sold > 0 {
        total_sales / total_items_sold as f64
    } else {
        0.0
    };
    SalesSummary {
        unique_products,
        total_items_sold,
        total_sales,
        average_sale_per_item,
    }
}
