use std::sync::Arc;

pub mod aggregate;
pub mod athena;
pub mod query;

#[cfg(test)]
mod testing;

pub use aggregate::{aggregate, AggregationError, LotSummary};
pub use athena::Athena;
pub use query::{Executor, QueryError, QueryService, QuerySettings, Record};

/// Largest page of rows which Athena will return from GetQueryResults.
pub const MAX_ROWS_LIMIT: i32 = 1000;

/// Settings which shape every invocation, whether served or run once.
#[derive(Debug, Clone, clap::Args)]
pub struct Settings {
    #[clap(flatten)]
    pub query: QuerySettings,
    /// Maximum number of result rows to fetch, including the header row.
    /// Rows beyond this cap are dropped.
    #[clap(
        long = "max-rows",
        env = "MAX_ROWS",
        default_value = "1000",
        value_parser = clap::value_parser!(i32).range(1..=MAX_ROWS_LIMIT as i64)
    )]
    pub max_rows: i32,
    /// Interval between checks of a running query's status.
    #[clap(long = "poll-interval", env = "POLL_INTERVAL", default_value = "1s")]
    pub poll_interval: humantime::Duration,
    /// Give up on a query which hasn't finished within this duration.
    /// If unset, a query is polled until it finishes.
    #[clap(long = "query-timeout", env = "QUERY_TIMEOUT")]
    pub query_timeout: Option<humantime::Duration>,
    /// AWS region of the Athena service. Defaults to the region of the ambient AWS configuration.
    #[clap(long = "region", env = "ATHENA_REGION")]
    pub region: Option<String>,
}

/// Error that describes a failed invocation.
/// It's returned to callers as a 500 with a JSON `{"error": ...}` body.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("failed to aggregate query results")]
    Aggregation(#[from] AggregationError),
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let error = format!("{:#}", anyhow::Error::new(self));
        tracing::error!(%error, "request failed");

        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(serde_json::json!({ "error": error })),
        )
            .into_response()
    }
}

/// App holds what's needed to run an invocation: the query executor
/// and the settings of the query it runs.
pub struct App<S> {
    executor: Executor<S>,
    settings: Settings,
}

impl<S: QueryService> App<S> {
    pub fn new(service: S, settings: Settings) -> Self {
        let executor = Executor::new(
            service,
            settings.poll_interval.into(),
            settings.query_timeout.map(Into::into),
        );
        Self { executor, settings }
    }

    /// Fetch the flattened rows of the configured view.
    pub async fn view_rows(&self) -> Result<Vec<Record>, Error> {
        Ok(self
            .executor
            .execute_and_fetch(&self.settings.query, self.settings.max_rows)
            .await?)
    }

    /// Fetch the rows of the configured view and summarize them by lot.
    pub async fn lot_aggregation(&self) -> Result<Vec<LotSummary>, Error> {
        let rows = self.view_rows().await?;
        let summaries = aggregate(&rows)?;

        tracing::info!(rows = rows.len(), lots = summaries.len(), "aggregated lots");
        Ok(summaries)
    }
}

pub fn router<S: QueryService>(app: Arc<App<S>>) -> axum::Router {
    axum::Router::new()
        .route("/v1/lot-aggregation", axum::routing::get(lot_aggregation::<S>))
        .route("/v1/view-rows", axum::routing::get(view_rows::<S>))
        .with_state(app)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[tracing::instrument(skip_all)]
async fn lot_aggregation<S: QueryService>(
    axum::extract::State(app): axum::extract::State<Arc<App<S>>>,
) -> Result<axum::Json<Vec<LotSummary>>, Error> {
    Ok(axum::Json(app.lot_aggregation().await?))
}

#[tracing::instrument(skip_all)]
async fn view_rows<S: QueryService>(
    axum::extract::State(app): axum::extract::State<Arc<App<S>>>,
) -> Result<axum::Json<Vec<Record>>, Error> {
    Ok(axum::Json(app.view_rows().await?))
}
