mod analytics;

pub use analytics::AnalyticsClient;

use crate::error::QueryError;
use crate::model::{QueryParams, ResultRow};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Transport-level progress reported while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    /// Success status and headers accepted.
    HeadersReceived,
    /// Body decoded into rows.
    BodyParsed { rows: usize },
}

/// Remote collaborators the controller talks to.
pub trait AnalyticsBackend: Send + Sync + 'static {
    fn fetch_product_sales<'a>(
        &'a self,
        params: &'a QueryParams,
        milestones: &'a UnboundedSender<Milestone>,
    ) -> BoxFuture<'a, Result<Vec<ResultRow>, QueryError>>;

    fn update_sheet<'a>(&'a self, rows: &'a [ResultRow]) -> BoxFuture<'a, Result<(), QueryError>>;
}

/// Runs one product-sales request under a cancellation token.
pub struct QueryEngine {
    backend: Arc<dyn AnalyticsBackend>,
}

impl QueryEngine {
    pub fn new(backend: Arc<dyn AnalyticsBackend>) -> Self {
        Self { backend }
    }

    /// Dropping the request future on cancellation aborts the transport; the
    /// backend itself may keep working.
    pub async fn run(
        self,
        params: QueryParams,
        milestones: UnboundedSender<Milestone>,
        cancel: CancellationToken,
    ) -> Result<Vec<ResultRow>, QueryError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            res = self.backend.fetch_product_sales(&params, &milestones) => res,
        }
    }
}
