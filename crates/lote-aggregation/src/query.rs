use indexmap::IndexMap;
use std::time::Duration;

/// A flattened result row, mapping column names to cell text in column order.
pub type Record = IndexMap<String, String>;

/// Settings of the query to run, as provided by the environment.
/// Each is optional at startup and is validated when a query is executed.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct QuerySettings {
    /// Name of the view to select from.
    #[clap(long = "view", env = "ATHENA_VIEW")]
    pub view: Option<String>,
    /// Database (catalog namespace) holding the view.
    #[clap(long = "database", env = "ATHENA_DB")]
    pub database: Option<String>,
    /// URI at which the query service stages result sets, like `s3://bucket/prefix/`.
    #[clap(long = "output-location", env = "S3_OUTPUT")]
    pub output_location: Option<String>,
}

impl QuerySettings {
    /// Build a QueryRequest, failing on the first setting which is absent or empty.
    pub fn request(&self) -> Result<QueryRequest, QueryError> {
        fn required(value: &Option<String>, env: &'static str) -> Result<String, QueryError> {
            match value.as_deref() {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(QueryError::Configuration(env)),
            }
        }

        Ok(QueryRequest {
            view: required(&self.view, "ATHENA_VIEW")?,
            database: required(&self.database, "ATHENA_DB")?,
            output_location: required(&self.output_location, "S3_OUTPUT")?,
        })
    }
}

/// A validated request to select all rows of a view.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub view: String,
    pub database: String,
    pub output_location: String,
}

impl QueryRequest {
    pub fn sql(&self) -> String {
        format!("SELECT * FROM {}", self.view)
    }
}

/// Identifier of a single query execution, as assigned by the query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHandle(pub String);

impl std::fmt::Display for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// A state this crate doesn't know about, which is treated as non-terminal.
    Other(String),
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Succeeded | QueryState::Failed | QueryState::Cancelled
        )
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QueryState::Queued => "QUEUED",
            QueryState::Running => "RUNNING",
            QueryState::Succeeded => "SUCCEEDED",
            QueryState::Failed => "FAILED",
            QueryState::Cancelled => "CANCELLED",
            QueryState::Other(other) => other.as_str(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatus {
    pub state: QueryState,
    /// Service-provided explanation of the latest state change, if any.
    pub reason: Option<String>,
}

/// One page of tabular results, as returned by the query service.
/// The first row repeats the column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResults {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Set if the service holds further pages. These are never fetched.
    pub next_token: Option<String>,
}

/// QueryService is the subset of an analytical query service used by the Executor.
pub trait QueryService: Send + Sync + 'static {
    fn start_query<'s>(
        &'s self,
        sql: &'s str,
        request: &'s QueryRequest,
    ) -> impl std::future::Future<Output = anyhow::Result<QueryHandle>> + Send + 's;

    fn query_status<'s>(
        &'s self,
        handle: &'s QueryHandle,
    ) -> impl std::future::Future<Output = anyhow::Result<QueryStatus>> + Send + 's;

    fn query_results<'s>(
        &'s self,
        handle: &'s QueryHandle,
        max_rows: i32,
    ) -> impl std::future::Future<Output = anyhow::Result<RawResults>> + Send + 's;
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("environment variable {0} not set")]
    Configuration(&'static str),
    #[error("failed to submit query")]
    Submission(#[source] anyhow::Error),
    #[error("failed to fetch status of query {0}")]
    Status(QueryHandle, #[source] anyhow::Error),
    #[error("failed to fetch results of query {0}")]
    Results(QueryHandle, #[source] anyhow::Error),
    #[error("query {handle} finished in state {state}{}", reason_suffix(.reason))]
    Execution {
        handle: QueryHandle,
        state: QueryState,
        reason: Option<String>,
    },
    #[error("query {0} did not complete within {1:?}")]
    Timeout(QueryHandle, Duration),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}

/// Executor runs queries against a QueryService and flattens their results.
#[derive(Debug)]
pub struct Executor<S> {
    service: S,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl<S: QueryService> Executor<S> {
    pub fn new(service: S, poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            service,
            poll_interval,
            timeout,
        }
    }

    /// Run `SELECT * FROM <view>` and return up to `max_rows` flattened records.
    /// Rows beyond `max_rows` are dropped.
    pub async fn execute_and_fetch(
        &self,
        settings: &QuerySettings,
        max_rows: i32,
    ) -> Result<Vec<Record>, QueryError> {
        let request = settings.request()?;
        let sql = request.sql();

        let handle = self
            .service
            .start_query(&sql, &request)
            .await
            .map_err(QueryError::Submission)?;

        tracing::info!(
            query_execution_id = %handle,
            database = %request.database,
            %sql,
            "started query"
        );

        let QueryStatus { state, reason } = self.wait_for_terminal(&handle).await?;

        if state != QueryState::Succeeded {
            return Err(QueryError::Execution {
                handle,
                state,
                reason,
            });
        }

        let results = self
            .service
            .query_results(&handle, max_rows)
            .await
            .map_err(|err| QueryError::Results(handle.clone(), err))?;

        if results.next_token.is_some() {
            tracing::warn!(
                query_execution_id = %handle,
                max_rows,
                "query returned more rows than max-rows; remaining rows are dropped"
            );
        }

        let records = flatten(results);
        tracing::info!(query_execution_id = %handle, rows = records.len(), "fetched query results");

        Ok(records)
    }

    // Poll the status of `handle` at a fixed interval until it's terminal.
    async fn wait_for_terminal(&self, handle: &QueryHandle) -> Result<QueryStatus, QueryError> {
        let started = tokio::time::Instant::now();

        loop {
            let status = self
                .service
                .query_status(handle)
                .await
                .map_err(|err| QueryError::Status(handle.clone(), err))?;

            tracing::debug!(query_execution_id = %handle, state = %status.state, "polled query");

            if status.state.is_terminal() {
                return Ok(status);
            }

            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    return Err(QueryError::Timeout(handle.clone(), timeout));
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Map each row after the leading header row into a Record keyed by column name.
/// Absent cells, including those missing from the end of a short row, become "".
pub fn flatten(results: RawResults) -> Vec<Record> {
    let RawResults { columns, rows, .. } = results;

    rows.into_iter()
        .skip(1)
        .map(|row| {
            let mut cells = row.into_iter();

            columns
                .iter()
                .map(|column| {
                    let value = cells.next().flatten().unwrap_or_default();
                    (column.clone(), value)
                })
                .collect()
        })
        .collect()
}
