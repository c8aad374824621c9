use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};

use distcalc::config::RetryConfig;
use distcalc::error::CalcError;
use distcalc::grpc::{AgentClient, RetryPolicy};
use distcalc::proto::orchestrator_server::{Orchestrator as OrchestratorRpc, OrchestratorServer};
use distcalc::proto::{
    AbandonRequest, AgentId, Empty, ExpressionTask, HeartbeatRequest, ResultOfExpression,
};

fn test_policy(max_attempts: u32, per_attempt_timeout_ms: u64) -> RetryPolicy {
    RetryPolicy::new(&RetryConfig {
        max_attempts,
        per_attempt_timeout_ms,
        backoff_ms: 5,
    })
}

// =============================================================================
// RetryPolicy
// =============================================================================

#[test]
fn test_transient_codes() {
    assert!(RetryPolicy::is_transient(Code::NotFound));
    assert!(RetryPolicy::is_transient(Code::Aborted));
    assert!(RetryPolicy::is_transient(Code::DeadlineExceeded));
    assert!(!RetryPolicy::is_transient(Code::InvalidArgument));
    assert!(!RetryPolicy::is_transient(Code::FailedPrecondition));
    assert!(!RetryPolicy::is_transient(Code::Unavailable));
    assert!(!RetryPolicy::is_transient(Code::Internal));
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failures() {
    let policy = test_policy(3, 1000);
    let calls = Arc::new(AtomicU32::new(0));

    let value = policy
        .call("flaky", || {
            let calls = calls.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(Status::not_found("not yet")),
                    1 => Err(Status::aborted("conflict")),
                    _ => Ok(Response::new(7u32)),
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    let policy = test_policy(3, 1000);
    let calls = Arc::new(AtomicU32::new(0));

    let err = policy
        .call("always_aborted", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Response<()>, _>(Status::aborted("busy"))
            }
        })
        .await
        .unwrap_err();

    match err {
        CalcError::RetriesExhausted {
            op,
            attempts,
            status,
        } => {
            assert_eq!(op, "always_aborted");
            assert_eq!(attempts, 3);
            assert_eq!(status.code(), Code::Aborted);
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_non_transient_failure_is_not_retried() {
    let policy = test_policy(5, 1000);
    let calls = Arc::new(AtomicU32::new(0));

    let err = policy
        .call("rejected", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Response<()>, _>(Status::invalid_argument("bad input"))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CalcError::Grpc(ref s) if s.code() == Code::InvalidArgument));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_attempt_counts_as_deadline_exceeded() {
    let policy = test_policy(2, 20);
    let calls = Arc::new(AtomicU32::new(0));

    let err = policy
        .call("slow", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, Status>(Response::new(()))
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CalcError::RetriesExhausted { ref status, .. } if status.code() == Code::DeadlineExceeded
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_zero_attempts_still_tries_once() {
    let policy = test_policy(0, 1000);
    let value = policy
        .call("once", || async { Ok::<_, Status>(Response::new("ok")) })
        .await
        .unwrap();
    assert_eq!(value, "ok");
}

// =============================================================================
// AgentClient against a flaky orchestrator
// =============================================================================

/// Fails `register_new_agent` with `Aborted` a fixed number of times, stalls
/// every heartbeat, and answers polls with no work.
#[derive(Default)]
struct FlakyOrchestrator {
    register_failures: u32,
    register_calls: AtomicU32,
    heartbeat_calls: AtomicU32,
}

#[tonic::async_trait]
impl OrchestratorRpc for FlakyOrchestrator {
    async fn register_new_agent(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<AgentId>, Status> {
        let call = self.register_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.register_failures {
            return Err(Status::aborted("try again"));
        }
        Ok(Response::new(AgentId { agent_id: 11 }))
    }

    async fn remove_agent(&self, _request: Request<AgentId>) -> Result<Response<Empty>, Status> {
        Err(Status::failed_precondition("unknown agent"))
    }

    async fn heartbeat(
        &self,
        _request: Request<HeartbeatRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(Response::new(Empty {}))
    }

    async fn get_expression_to_evaluate(
        &self,
        _request: Request<AgentId>,
    ) -> Result<Response<ExpressionTask>, Status> {
        Ok(Response::new(ExpressionTask::default()))
    }

    async fn give_result_of_expression(
        &self,
        _request: Request<ResultOfExpression>,
    ) -> Result<Response<Empty>, Status> {
        Err(Status::not_found("no such expression"))
    }

    async fn abandon_expression(
        &self,
        _request: Request<AbandonRequest>,
    ) -> Result<Response<Empty>, Status> {
        Ok(Response::new(Empty {}))
    }
}

async fn start_flaky(
    port: u16,
    register_failures: u32,
) -> (Arc<FlakyOrchestrator>, CancellationToken) {
    let service = Arc::new(FlakyOrchestrator {
        register_failures,
        ..Default::default()
    });
    let shutdown = CancellationToken::new();
    let addr = format!("127.0.0.1:{}", port).parse().unwrap();

    let server = OrchestratorServer::from_arc(service.clone());
    let token = shutdown.clone();
    tokio::spawn(async move {
        Server::builder()
            .add_service(server)
            .serve_with_shutdown(addr, token.cancelled_owned())
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    (service, shutdown)
}

fn client_for(port: u16) -> AgentClient {
    AgentClient::connect_lazy(
        &format!("http://127.0.0.1:{}", port),
        &RetryConfig {
            max_attempts: 3,
            per_attempt_timeout_ms: 200,
            backoff_ms: 10,
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_client_retries_aborted_registration() {
    let (service, shutdown) = start_flaky(50711, 2).await;
    let client = client_for(50711);

    assert_eq!(client.register_new_agent().await.unwrap(), 11);
    assert_eq!(service.register_calls.load(Ordering::SeqCst), 3);

    shutdown.cancel();
}

#[tokio::test]
async fn test_client_gives_up_on_persistent_abort() {
    let (service, shutdown) = start_flaky(50712, 10).await;
    let client = client_for(50712);

    let err = client.register_new_agent().await.unwrap_err();
    assert!(matches!(err, CalcError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(service.register_calls.load(Ordering::SeqCst), 3);

    shutdown.cancel();
}

#[tokio::test]
async fn test_client_times_out_stalled_heartbeat() {
    let (service, shutdown) = start_flaky(50713, 0).await;
    let client = client_for(50713);

    let err = client.heartbeat(11, true).await.unwrap_err();
    assert!(matches!(
        err,
        CalcError::RetriesExhausted { ref status, .. } if status.code() == Code::DeadlineExceeded
    ));
    assert_eq!(service.heartbeat_calls.load(Ordering::SeqCst), 3);

    shutdown.cancel();
}

#[tokio::test]
async fn test_client_maps_empty_poll_and_hard_failures() {
    let (_service, shutdown) = start_flaky(50714, 0).await;
    let client = client_for(50714);

    assert!(matches!(
        client.get_expression_to_evaluate(11).await,
        Err(CalcError::NoWorkAvailable)
    ));

    // not-found is transient: retried up to the limit
    let err = client
        .give_result_of_expression("gone", 1.0, 11)
        .await
        .unwrap_err();
    assert!(matches!(err, CalcError::RetriesExhausted { attempts: 3, .. }));

    // failed-precondition is not: surfaced after one attempt
    let err = client.remove_agent(11).await.unwrap_err();
    assert!(matches!(err, CalcError::Grpc(ref s) if s.code() == Code::FailedPrecondition));

    shutdown.cancel();
}
