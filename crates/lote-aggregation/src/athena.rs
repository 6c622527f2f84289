use crate::query::{QueryHandle, QueryRequest, QueryService, QueryState, QueryStatus, RawResults};
use anyhow::Context;
use aws_sdk_athena::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};

/// Athena is a QueryService backed by AWS Athena.
#[derive(Debug, Clone)]
pub struct Athena {
    client: aws_sdk_athena::Client,
}

impl Athena {
    pub fn new(client: aws_sdk_athena::Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS configuration (environment, profile,
    /// or instance role), optionally overriding its region.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;

        Self::new(aws_sdk_athena::Client::new(&config))
    }
}

impl QueryService for Athena {
    async fn start_query<'s>(
        &'s self,
        sql: &'s str,
        request: &'s QueryRequest,
    ) -> anyhow::Result<QueryHandle> {
        let response = self
            .client
            .start_query_execution()
            .query_string(sql)
            .query_execution_context(
                QueryExecutionContext::builder()
                    .database(&request.database)
                    .build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&request.output_location)
                    .build(),
            )
            .send()
            .await;

        let response = response.map_err(|e| {
            service_error(
                format!("StartQueryExecution of database {} failed", request.database),
                e,
            )
        })?;

        let id = response
            .query_execution_id()
            .context("no QueryExecutionId returned from StartQueryExecution")?;

        Ok(QueryHandle(id.to_string()))
    }

    async fn query_status<'s>(&'s self, handle: &'s QueryHandle) -> anyhow::Result<QueryStatus> {
        let response = self
            .client
            .get_query_execution()
            .query_execution_id(&handle.0)
            .send()
            .await
            .map_err(|e| service_error("GetQueryExecution failed".to_string(), e))?;

        let status = response
            .query_execution()
            .and_then(|execution| execution.status())
            .context("no status returned from GetQueryExecution")?;

        let state = match status.state() {
            Some(state) => map_state(state),
            // Athena omits the state only before the execution is scheduled.
            None => QueryState::Queued,
        };

        Ok(QueryStatus {
            state,
            reason: status.state_change_reason().map(str::to_string),
        })
    }

    async fn query_results<'s>(
        &'s self,
        handle: &'s QueryHandle,
        max_rows: i32,
    ) -> anyhow::Result<RawResults> {
        let response = self
            .client
            .get_query_results()
            .query_execution_id(&handle.0)
            .max_results(max_rows)
            .send()
            .await
            .map_err(|e| service_error("GetQueryResults failed".to_string(), e))?;

        let result_set = response
            .result_set()
            .context("no ResultSet returned from GetQueryResults")?;

        let columns = result_set
            .result_set_metadata()
            .map(|metadata| {
                metadata
                    .column_info()
                    .iter()
                    .map(|column| column.name().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let rows = result_set
            .rows()
            .iter()
            .map(|row| {
                row.data()
                    .iter()
                    .map(|datum| datum.var_char_value().map(str::to_string))
                    .collect()
            })
            .collect();

        Ok(RawResults {
            columns,
            rows,
            next_token: response.next_token().map(str::to_string),
        })
    }
}

// Describe a failed Athena call. Errors returned by the service carry a code and message.
// Others (dispatch failures, timeouts, request construction) carry neither,
// and are kept as the source of the returned error instead.
fn service_error<E, R>(operation: String, e: SdkError<E, R>) -> anyhow::Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if let Some(code) = e.code() {
        return anyhow::anyhow!("{operation} ({code}): {}", e.message().unwrap_or_default());
    }
    anyhow::Error::new(e).context(operation)
}

fn map_state(state: &QueryExecutionState) -> QueryState {
    match state {
        QueryExecutionState::Queued => QueryState::Queued,
        QueryExecutionState::Running => QueryState::Running,
        QueryExecutionState::Succeeded => QueryState::Succeeded,
        QueryExecutionState::Failed => QueryState::Failed,
        QueryExecutionState::Cancelled => QueryState::Cancelled,
        other => QueryState::Other(other.as_str().to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use aws_sdk_athena::operation::start_query_execution::StartQueryExecutionError;

    #[test]
    fn test_service_error_without_response_keeps_cause() {
        let e: SdkError<StartQueryExecutionError> =
            SdkError::timeout_error("connection to athena.us-east-1.amazonaws.com timed out");

        let err = service_error(
            "StartQueryExecution of database catastro failed".to_string(),
            e,
        );
        let message = format!("{err:#}");

        assert!(
            message.starts_with("StartQueryExecution of database catastro failed: "),
            "{message}"
        );
        assert!(message.contains("timed out"), "{message}");
        assert!(!message.contains("(): "), "{message}");
    }

    #[test]
    fn test_state_mapping() {
        let states = [
            QueryExecutionState::Queued,
            QueryExecutionState::Running,
            QueryExecutionState::Succeeded,
            QueryExecutionState::Failed,
            QueryExecutionState::Cancelled,
            QueryExecutionState::from("PAUSED"),
        ]
        .iter()
        .map(|state| {
            let state = map_state(state);
            (state.to_string(), state.is_terminal())
        })
        .collect::<Vec<_>>();

        insta::assert_debug_snapshot!(states, @r###"
        [
            (
                "QUEUED",
                false,
            ),
            (
                "RUNNING",
                false,
            ),
            (
                "SUCCEEDED",
                true,
            ),
            (
                "FAILED",
                true,
            ),
            (
                "CANCELLED",
                true,
            ),
            (
                "PAUSED",
                false,
            ),
        ]
        "###);
    }
}
