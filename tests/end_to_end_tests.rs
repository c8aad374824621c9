//! Orchestrator and agents talking over real loopback gRPC.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Server};
use tonic::{Code, Request, Response, Status};

use distcalc::agent::{AgentNode, PollOutcome};
use distcalc::config::{AgentConfig, DurationTable, OrchestratorConfig, RetryConfig};
use distcalc::error::{CalcError, Result};
use distcalc::expression::ExpressionStatus;
use distcalc::grpc::agent_service::AgentService;
use distcalc::grpc::AgentClient;
use distcalc::node::OrchestratorNode;
use distcalc::proto::calculator_client::CalculatorClient;
use distcalc::proto::orchestrator_server::{Orchestrator as OrchestratorRpc, OrchestratorServer};
use distcalc::proto::{
    AbandonRequest, AgentId, Empty, ExpressionId, ExpressionInfo, ExpressionTask,
    HeartbeatRequest, ListExpressionsRequest, ResultOfExpression, SubmitExpressionRequest,
};
use distcalc::scheduler::Orchestrator;

/// Handle to a running orchestrator
struct TestOrchestrator {
    addr: String,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl TestOrchestrator {
    async fn start(port: u16) -> Self {
        Self::start_with(OrchestratorConfig::new(
            format!("127.0.0.1:{}", port).parse().unwrap(),
        ))
        .await
    }

    async fn start_with(config: OrchestratorConfig) -> Self {
        let listener = TcpListener::bind(config.listen_addr).await.unwrap();
        let addr = format!("http://{}", config.listen_addr);
        let node = OrchestratorNode::new(config);
        let orchestrator = node.orchestrator.clone();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(node.run_with_listener(listener, shutdown.clone()));

        Self {
            addr,
            orchestrator,
            shutdown,
            handle,
        }
    }

    async fn client(&self) -> CalculatorClient<Channel> {
        CalculatorClient::connect(self.addr.clone()).await.unwrap()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

/// Agent config with short timings for faster tests
fn test_agent_config(addr: &str) -> AgentConfig {
    AgentConfig::new(addr)
        .with_calculation_units(2)
        .with_durations(DurationTable::uniform(Duration::from_millis(10)))
        .with_poll_interval_ms(20)
        .with_heartbeat_interval_ms(50)
        .with_subtask_timeout_ms(2_000)
        .with_retry(RetryConfig {
            max_attempts: 3,
            per_attempt_timeout_ms: 1_000,
            backoff_ms: 10,
        })
}

fn spawn_agent(config: AgentConfig) -> (CancellationToken, JoinHandle<Result<()>>) {
    let shutdown = CancellationToken::new();
    let agent = AgentNode::new(config).unwrap();
    let handle = tokio::spawn(agent.run(shutdown.clone()));
    (shutdown, handle)
}

async fn submit(client: &mut CalculatorClient<Channel>, infix: &str) -> String {
    client
        .submit_expression(SubmitExpressionRequest {
            infix: infix.to_string(),
            owner_id: None,
        })
        .await
        .unwrap()
        .into_inner()
        .expression_id
}

async fn get(client: &mut CalculatorClient<Channel>, id: &str) -> ExpressionInfo {
    client
        .get_expression(ExpressionId {
            expression_id: id.to_string(),
        })
        .await
        .unwrap()
        .into_inner()
}

/// Wait until the expression is solved and return its result
async fn wait_for_result(client: &mut CalculatorClient<Channel>, id: &str) -> f64 {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let response = client
            .get_result(ExpressionId {
                expression_id: id.to_string(),
            })
            .await
            .unwrap()
            .into_inner();
        if response.ready {
            return response.result;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expression {} still {}",
            id,
            response.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_for_agents(client: &mut CalculatorClient<Channel>, expected: &[u64]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let agents: Vec<u64> = client
            .list_agents(Empty {})
            .await
            .unwrap()
            .into_inner()
            .agents
            .iter()
            .map(|a| a.agent_id)
            .collect();
        if agents == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "agents {:?}, expected {:?}",
            agents,
            expected
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_scenario_a_precedence() {
    let orchestrator = TestOrchestrator::start(50721).await;
    let mut client = orchestrator.client().await;

    let id = submit(&mut client, "3+4*2").await;
    let info = get(&mut client, &id).await;
    let postfix: Vec<&str> = info.postfix.iter().map(|t| t.value.as_str()).collect();
    assert_eq!(postfix, vec!["3", "4", "2", "*", "+"]);
    assert_eq!(info.status, "new");

    let (agent_shutdown, agent) = spawn_agent(test_agent_config(&orchestrator.addr));
    assert_eq!(wait_for_result(&mut client, &id).await, 11.0);

    agent_shutdown.cancel();
    agent.await.unwrap().unwrap();
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_scenario_b_parentheses() {
    let orchestrator = TestOrchestrator::start(50722).await;
    let mut client = orchestrator.client().await;
    let (agent_shutdown, agent) = spawn_agent(test_agent_config(&orchestrator.addr));

    let id = submit(&mut client, "(1+2)*3").await;
    assert_eq!(wait_for_result(&mut client, &id).await, 9.0);
    assert_eq!(get(&mut client, &id).await.status, "solved");

    agent_shutdown.cancel();
    agent.await.unwrap().unwrap();
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_scenario_c_removed_agent_releases_claim() {
    let orchestrator = TestOrchestrator::start(50723).await;
    let mut client = orchestrator.client().await;
    let agent = AgentClient::connect_lazy(&orchestrator.addr, &RetryConfig::default()).unwrap();

    let agent_id = agent.register_new_agent().await.unwrap();
    let id = submit(&mut client, "2*(3+4)").await;

    let claimed = agent.get_expression_to_evaluate(agent_id).await.unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(get(&mut client, &id).await.status, format!("solving-{}", agent_id));

    agent.remove_agent(agent_id).await.unwrap();

    assert_eq!(get(&mut client, &id).await.status, "new");
    let other = agent.register_new_agent().await.unwrap();
    assert_eq!(agent.get_expression_to_evaluate(other).await.unwrap().id, id);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_scenario_d_malformed_submission() {
    let orchestrator = TestOrchestrator::start(50724).await;
    let mut client = orchestrator.client().await;

    let status = client
        .submit_expression(SubmitExpressionRequest {
            infix: "3+*4".to_string(),
            owner_id: None,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let listed = client
        .list_expressions(ListExpressionsRequest { owner_id: None })
        .await
        .unwrap()
        .into_inner();
    assert!(listed.expressions.is_empty());

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_multiple_agents_solve_backlog() {
    let orchestrator = TestOrchestrator::start(50725).await;
    let mut client = orchestrator.client().await;

    let cases = [
        ("1+1", 2.0),
        ("2*3+4", 10.0),
        ("2^10", 1024.0),
        ("100/4/5", 5.0),
        ("(7-2)*(3+1)", 20.0),
        ("9-3-2", 4.0),
    ];
    let mut ids = Vec::new();
    for (infix, _) in cases {
        ids.push(submit(&mut client, infix).await);
    }

    let agents: Vec<_> = (0..3)
        .map(|_| spawn_agent(test_agent_config(&orchestrator.addr)))
        .collect();

    for (id, (infix, expected)) in ids.iter().zip(cases) {
        assert_eq!(wait_for_result(&mut client, id).await, expected, "{}", infix);
    }

    for (shutdown, handle) in agents {
        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
    // every agent deregistered on the way out
    wait_for_agents(&mut client, &[]).await;
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_agent_reregisters_after_being_removed() {
    let orchestrator = TestOrchestrator::start(50726).await;
    let mut client = orchestrator.client().await;
    let (agent_shutdown, agent) = spawn_agent(test_agent_config(&orchestrator.addr));

    wait_for_agents(&mut client, &[1]).await;
    orchestrator.orchestrator.remove_agent(1).await;
    wait_for_agents(&mut client, &[2]).await;

    let id = submit(&mut client, "6*7").await;
    assert_eq!(wait_for_result(&mut client, &id).await, 42.0);

    agent_shutdown.cancel();
    agent.await.unwrap().unwrap();
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_crashed_agent_work_is_reclaimed() {
    let config = OrchestratorConfig::new("127.0.0.1:50727".parse().unwrap())
        .with_agent_timeout_ms(300)
        .with_reap_interval_ms(50);
    let orchestrator = TestOrchestrator::start_with(config).await;
    let mut client = orchestrator.client().await;

    // slow agent claims the expression and then dies without deregistering
    let slow = test_agent_config(&orchestrator.addr)
        .with_durations(DurationTable::uniform(Duration::from_secs(30)));
    let (_slow_shutdown, slow_agent) = spawn_agent(slow);

    let id = submit(&mut client, "5+5").await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while get(&mut client, &id).await.status != "solving-1" {
        assert!(tokio::time::Instant::now() < deadline, "slow agent never claimed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    slow_agent.abort();

    let (agent_shutdown, agent) = spawn_agent(test_agent_config(&orchestrator.addr));
    assert_eq!(wait_for_result(&mut client, &id).await, 10.0);
    wait_for_agents(&mut client, &[2]).await;

    agent_shutdown.cancel();
    agent.await.unwrap().unwrap();
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_poll_once_outcomes() {
    let orchestrator = TestOrchestrator::start(50728).await;
    let mut client = orchestrator.client().await;
    let agent = AgentNode::new(test_agent_config(&orchestrator.addr)).unwrap();

    assert_eq!(agent.poll_once().await.unwrap(), PollOutcome::Idle);
    assert_eq!(agent.agent_id(), Some(1));

    let id = submit(&mut client, "2^3^2").await;
    assert_eq!(
        agent.poll_once().await.unwrap(),
        PollOutcome::Solved {
            expression_id: id,
            result: 512.0
        }
    );

    let completed: u64 = agent.pool().stats().iter().map(|s| s.completed).sum();
    assert_eq!(completed, 2);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_timed_out_expression_goes_back_to_queue() {
    let orchestrator = TestOrchestrator::start(50729).await;
    let mut client = orchestrator.client().await;
    let config = test_agent_config(&orchestrator.addr)
        .with_durations(DurationTable::uniform(Duration::from_millis(300)))
        .with_subtask_timeout_ms(50);
    let agent = AgentNode::new(config).unwrap();

    let id = submit(&mut client, "1+2").await;
    assert_eq!(
        agent.poll_once().await.unwrap(),
        PollOutcome::Abandoned {
            expression_id: id.clone(),
            invalid: false
        }
    );
    assert_eq!(get(&mut client, &id).await.status, "new");

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_unreachable_orchestrator_fails_poll() {
    let config = test_agent_config("http://127.0.0.1:50730").with_retry(RetryConfig {
        max_attempts: 2,
        per_attempt_timeout_ms: 200,
        backoff_ms: 10,
    });
    let agent = AgentNode::new(config).unwrap();

    let err = agent.poll_once().await.unwrap_err();
    assert!(matches!(
        err,
        CalcError::Grpc(_) | CalcError::RetriesExhausted { .. }
    ));
    assert_eq!(agent.agent_id(), None);
}

/// Real agent protocol that counts polls and loses the first
/// `lost_results` result reports.
struct InstrumentedService {
    inner: AgentService,
    lost_results: AtomicU32,
    polls: AtomicU32,
}

#[tonic::async_trait]
impl OrchestratorRpc for InstrumentedService {
    async fn register_new_agent(
        &self,
        request: Request<Empty>,
    ) -> std::result::Result<Response<AgentId>, Status> {
        self.inner.register_new_agent(request).await
    }

    async fn remove_agent(
        &self,
        request: Request<AgentId>,
    ) -> std::result::Result<Response<Empty>, Status> {
        self.inner.remove_agent(request).await
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> std::result::Result<Response<Empty>, Status> {
        self.inner.heartbeat(request).await
    }

    async fn get_expression_to_evaluate(
        &self,
        request: Request<AgentId>,
    ) -> std::result::Result<Response<ExpressionTask>, Status> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_expression_to_evaluate(request).await
    }

    async fn give_result_of_expression(
        &self,
        request: Request<ResultOfExpression>,
    ) -> std::result::Result<Response<Empty>, Status> {
        let lost = self
            .lost_results
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(Status::unavailable("connection reset"));
        }
        self.inner.give_result_of_expression(request).await
    }

    async fn abandon_expression(
        &self,
        request: Request<AbandonRequest>,
    ) -> std::result::Result<Response<Empty>, Status> {
        self.inner.abandon_expression(request).await
    }
}

async fn start_instrumented(
    port: u16,
    lost_results: u32,
) -> (Arc<Orchestrator>, Arc<InstrumentedService>, CancellationToken) {
    let orchestrator = Arc::new(Orchestrator::new(&OrchestratorConfig::default()));
    let service = Arc::new(InstrumentedService {
        inner: AgentService::new(orchestrator.clone()),
        lost_results: AtomicU32::new(lost_results),
        polls: AtomicU32::new(0),
    });
    let server = OrchestratorServer::from_arc(service.clone());
    let shutdown = CancellationToken::new();
    let addr = format!("127.0.0.1:{}", port).parse().unwrap();
    let token = shutdown.clone();
    tokio::spawn(async move {
        Server::builder()
            .add_service(server)
            .serve_with_shutdown(addr, token.cancelled_owned())
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    (orchestrator, service, shutdown)
}

#[tokio::test]
async fn test_lost_result_is_resent_on_next_poll() {
    let (orchestrator, _service, shutdown) = start_instrumented(50731, 1).await;
    let agent = AgentNode::new(test_agent_config("http://127.0.0.1:50731")).unwrap();
    let id = orchestrator.submit_expression("3+4*2", None).await.unwrap();

    let err = agent.poll_once().await.unwrap_err();
    assert!(matches!(err, CalcError::Grpc(ref s) if s.code() == Code::Unavailable));
    assert!(agent.has_unreported().await);

    // delivered before the next claim, which then finds nothing left
    assert_eq!(agent.poll_once().await.unwrap(), PollOutcome::Idle);
    assert!(!agent.has_unreported().await);
    assert_eq!(orchestrator.get_result(&id).await.unwrap(), 11.0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_undeliverable_result_is_requeued_for_other_agents() {
    let (orchestrator, _service, shutdown) = start_instrumented(50732, 2).await;
    let agent = AgentNode::new(test_agent_config("http://127.0.0.1:50732")).unwrap();
    let id = orchestrator.submit_expression("(1+2)*3", None).await.unwrap();

    assert!(agent.poll_once().await.is_err());

    // the resend fails too; the orchestrator takes the claim back when the
    // agent polls and keeps it away from that agent for this poll
    assert_eq!(agent.poll_once().await.unwrap(), PollOutcome::Idle);
    assert!(!agent.has_unreported().await);
    let expr = orchestrator.get_expression(&id).await.unwrap();
    assert_eq!(expr.status, ExpressionStatus::New);

    let other = orchestrator.register_new_agent().await;
    let claimed = orchestrator.get_expression_to_evaluate(other).await.unwrap();
    assert_eq!(claimed.id, id);

    shutdown.cancel();
}

#[tokio::test]
async fn test_slow_solve_does_not_trigger_poll_burst() {
    let (orchestrator, service, shutdown) = start_instrumented(50733, 0).await;
    let config = test_agent_config("http://127.0.0.1:50733")
        .with_durations(DurationTable::uniform(Duration::from_millis(500)))
        .with_poll_interval_ms(100);
    let id = orchestrator.submit_expression("1+1", None).await.unwrap();
    let (agent_shutdown, handle) = spawn_agent(config);

    tokio::time::sleep(Duration::from_millis(650)).await;
    assert_eq!(orchestrator.get_result(&id).await.unwrap(), 2.0);

    // one claim, then the regular cadence resumes after the solve
    let polls = service.polls.load(Ordering::SeqCst);
    assert!(polls <= 3, "{} polls in 650ms", polls);

    agent_shutdown.cancel();
    handle.await.unwrap().unwrap();
    shutdown.cancel();
}
