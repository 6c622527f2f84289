use crate::query::{QueryHandle, QueryRequest, QueryService, QueryState, QueryStatus, RawResults};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A call made of a FakeService.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    Start {
        sql: String,
        database: String,
        output_location: String,
    },
    Status,
    Results {
        max_rows: i32,
    },
}

/// FakeService is a scripted QueryService which records the calls made of it.
/// It reports queued states in order, and then its final status indefinitely.
#[derive(Debug, Clone)]
pub struct FakeService(Arc<Mutex<FakeServiceInner>>);

#[derive(Debug)]
struct FakeServiceInner {
    calls: Vec<FakeCall>,
    states: VecDeque<QueryState>,
    final_status: QueryStatus,
    results: RawResults,
    start_error: Option<String>,
    status_error: Option<String>,
    results_error: Option<String>,
}

impl FakeService {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(FakeServiceInner {
            calls: Vec::new(),
            states: VecDeque::new(),
            final_status: QueryStatus {
                state: QueryState::Succeeded,
                reason: None,
            },
            results: RawResults::default(),
            start_error: None,
            status_error: None,
            results_error: None,
        })))
    }

    pub async fn push_states(&self, states: impl IntoIterator<Item = QueryState>) {
        self.0.lock().await.states.extend(states);
    }

    pub async fn set_final(&self, status: QueryStatus) {
        self.0.lock().await.final_status = status;
    }

    pub async fn set_results(&self, results: RawResults) {
        self.0.lock().await.results = results;
    }

    pub async fn fail_start(&self, message: &str) {
        self.0.lock().await.start_error = Some(message.to_string());
    }

    pub async fn fail_status(&self, message: &str) {
        self.0.lock().await.status_error = Some(message.to_string());
    }

    pub async fn fail_results(&self, message: &str) {
        self.0.lock().await.results_error = Some(message.to_string());
    }

    pub async fn take_calls(&self) -> Vec<FakeCall> {
        std::mem::take(&mut self.0.lock().await.calls)
    }
}

impl QueryService for FakeService {
    async fn start_query<'s>(
        &'s self,
        sql: &'s str,
        request: &'s QueryRequest,
    ) -> anyhow::Result<QueryHandle> {
        let mut lock = self.0.lock().await;
        lock.calls.push(FakeCall::Start {
            sql: sql.to_string(),
            database: request.database.clone(),
            output_location: request.output_location.clone(),
        });

        if let Some(message) = &lock.start_error {
            anyhow::bail!("{message}");
        }
        Ok(QueryHandle("fake-execution-id".to_string()))
    }

    async fn query_status<'s>(&'s self, _handle: &'s QueryHandle) -> anyhow::Result<QueryStatus> {
        let mut lock = self.0.lock().await;
        lock.calls.push(FakeCall::Status);

        if let Some(message) = &lock.status_error {
            anyhow::bail!("{message}");
        }

        match lock.states.pop_front() {
            Some(state) => Ok(QueryStatus {
                state,
                reason: None,
            }),
            None => Ok(lock.final_status.clone()),
        }
    }

    async fn query_results<'s>(
        &'s self,
        _handle: &'s QueryHandle,
        max_rows: i32,
    ) -> anyhow::Result<RawResults> {
        let mut lock = self.0.lock().await;
        lock.calls.push(FakeCall::Results { max_rows });

        if let Some(message) = &lock.results_error {
            anyhow::bail!("{message}");
        }
        Ok(lock.results.clone())
    }
}

/// Raw results of a view having a header row followed by `rows`
/// of (codigo_lote, area_terreno_m2) pairs.
pub fn lot_results(rows: &[(&str, &str)]) -> RawResults {
    let columns = vec!["codigo_lote".to_string(), "area_terreno_m2".to_string()];
    let header = columns.iter().cloned().map(Some).collect();

    RawResults {
        rows: std::iter::once(header)
            .chain(rows.iter().map(|(lote, area)| {
                vec![Some(lote.to_string()), Some(area.to_string())]
            }))
            .collect(),
        columns,
        next_token: None,
    }
}
