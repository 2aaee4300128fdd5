//! Engine actor - runs executions concurrently on the Tokio runtime

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::history::{HistoryEntry, ResultSink};
use crate::messages::{EngineCommand, EngineResponse};
use crate::orchestrator::Orchestrator;

/// Engine actor that processes execution commands
pub struct EngineActor {
    orchestrator: Arc<Orchestrator>,
    response_tx: mpsc::UnboundedSender<EngineResponse>,
    sink: Option<Arc<dyn ResultSink>>,
    active: JoinSet<u64>,
    cancel_handles: HashMap<u64, oneshot::Sender<()>>,
}

impl EngineActor {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        response_tx: mpsc::UnboundedSender<EngineResponse>,
    ) -> Self {
        EngineActor {
            orchestrator,
            response_tx,
            sink: None,
            active: JoinSet::new(),
            cancel_handles: HashMap::new(),
        }
    }

    /// Record a summary of every dispatched execution into `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run the actor message loop
    pub async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>) {
        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Execute { id, request }) => {
                            let (cancel_tx, mut cancel_rx) = oneshot::channel();
                            self.cancel_handles.insert(id, cancel_tx);

                            let orchestrator = self.orchestrator.clone();
                            let response_tx = self.response_tx.clone();
                            let sink = self.sink.clone();

                            self.active.spawn(async move {
                                tokio::select! {
                                    biased;

                                    // Dropping the execution future kills any curl child
                                    Ok(()) = &mut cancel_rx => {}

                                    outcome = orchestrator.execute(*request) => {
                                        if let (Some(sink), Some(entry)) = (&sink, HistoryEntry::from_outcome(&outcome)) {
                                            sink.record(entry);
                                        }
                                        let _ = response_tx.send(EngineResponse::Finished {
                                            id,
                                            outcome: Box::new(outcome),
                                        });
                                    }
                                }
                                id
                            });
                        }

                        Some(EngineCommand::Cancel(id)) => {
                            if let Some(cancel_tx) = self.cancel_handles.remove(&id) {
                                // A dropped receiver means the execution already finished
                                if cancel_tx.send(()).is_ok() {
                                    tracing::info!(id, "Cancelling execution");
                                    let _ = self.response_tx.send(EngineResponse::Cancelled { id });
                                }
                            }
                        }

                        Some(EngineCommand::Shutdown) => {
                            for (_, cancel_tx) in self.cancel_handles.drain() {
                                let _ = cancel_tx.send(());
                            }
                            break;
                        }

                        None => break,
                    }
                }

                Some(joined) = self.active.join_next() => {
                    match joined {
                        Ok(id) => {
                            self.cancel_handles.remove(&id);
                        }
                        Err(e) => tracing::error!(error = %e, "Execution task failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::history::History;
    use crate::models::{HttpMethod, Protocol, RequestSpec};
    use crate::orchestrator::ExecutionRequest;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spawn_actor(
        sink: Option<Arc<dyn ResultSink>>,
    ) -> (
        mpsc::UnboundedSender<EngineCommand>,
        mpsc::UnboundedReceiver<EngineResponse>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let mut actor = EngineActor::new(Arc::new(Orchestrator::new(EngineConfig::default())), response_tx);
        if let Some(sink) = sink {
            actor = actor.with_sink(sink);
        }
        tokio::spawn(actor.run(cmd_rx));
        (cmd_tx, response_rx)
    }

    #[tokio::test]
    async fn test_finished_execution_is_recorded() {
        let history = Arc::new(History::new());
        let (cmd_tx, mut response_rx) = spawn_actor(Some(history.clone()));

        let request = RequestSpec::new(HttpMethod::POST, "grpc://localhost:50051").with_protocol(Protocol::Rpc);
        cmd_tx
            .send(EngineCommand::Execute {
                id: 7,
                request: Box::new(ExecutionRequest::new(request)),
            })
            .unwrap();

        let response = response_rx.recv().await.unwrap();
        assert_eq!(response.id(), 7);
        match response {
            EngineResponse::Finished { outcome, .. } => assert_eq!(outcome.status(), Some(0)),
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(history.len(), 1);
        assert_eq!(history.get(0).unwrap().url, "grpc://localhost:50051");

        cmd_tx.send(EngineCommand::Shutdown).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_pending_execution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let (cmd_tx, mut response_rx) = spawn_actor(None);
        let request = RequestSpec::new(HttpMethod::GET, server.uri());
        cmd_tx
            .send(EngineCommand::Execute {
                id: 1,
                request: Box::new(ExecutionRequest::new(request)),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cmd_tx.send(EngineCommand::Cancel(1)).unwrap();

        let response = tokio::time::timeout(Duration::from_secs(2), response_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(response, EngineResponse::Cancelled { id: 1 }));
    }
}
