use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use distcalc::agent::AgentNode;
use distcalc::config::{AgentConfig, DurationTable, OrchestratorConfig, RetryConfig};
use distcalc::node::OrchestratorNode;
use distcalc::proto::calculator_client::CalculatorClient;
use distcalc::proto::{
    Empty, ExpressionId, ExpressionInfo, ListExpressionsRequest, RpnToken,
    SubmitExpressionRequest,
};
use distcalc::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "distcalc")]
#[command(version)]
#[command(about = "Distributed arithmetic expression evaluator")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the orchestrator (expression store, agent registry, gRPC server)
    Orchestrator(OrchestratorArgs),

    /// Run an agent that polls the orchestrator for expressions
    Agent(AgentArgs),

    /// Expression commands
    Expr {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ExprCommands,
    },

    /// Agent registry commands
    Agents {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: AgentsCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct OrchestratorArgs {
    /// Port to listen on for gRPC
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Agents silent for longer than this are removed and their claims reverted
    #[arg(long, default_value = "30000")]
    agent_timeout_ms: u64,

    /// How often to look for silent agents
    #[arg(long, default_value = "5000")]
    reap_interval_ms: u64,

    /// Maximum number of stored expressions
    #[arg(long, default_value = "10000")]
    max_expressions: usize,
}

#[derive(Parser, Debug)]
struct AgentArgs {
    /// Orchestrator address
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    orchestrator: String,

    /// Number of calculation units
    #[arg(long, default_value = "4")]
    units: usize,

    /// Per-operator durations in milliseconds, e.g. "+=1000,*=2000,^=3000"
    #[arg(long, default_value = "")]
    durations: String,

    #[arg(long, default_value = "10000")]
    poll_interval_ms: u64,

    #[arg(long, default_value = "5000")]
    heartbeat_interval_ms: u64,

    /// Give up on a sub-task after this long and hand the expression back
    #[arg(long, default_value = "60000")]
    subtask_timeout_ms: u64,

    /// Attempts per RPC, including the first
    #[arg(long, default_value = "3")]
    retries: u32,

    #[arg(long, default_value = "5000")]
    attempt_timeout_ms: u64,
}

// =============================================================================
// Client Arguments (shared by expr and agents commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Orchestrator address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum ExprCommands {
    /// Submit an infix expression, e.g. "2 + 2 * 2"
    Submit {
        infix: String,

        /// Owner to file the expression under
        #[arg(long)]
        owner: Option<u64>,
    },
    /// Show one expression
    Get { expression_id: String },
    /// List expressions
    List {
        /// Only expressions of this owner
        #[arg(long)]
        owner: Option<u64>,
    },
    /// Show the result of an expression
    Result { expression_id: String },
}

#[derive(clap::Subcommand, Debug)]
enum AgentsCommands {
    /// List registered agents
    List,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct SubmitOutput {
    expression_id: String,
}

#[derive(Serialize)]
struct ExpressionOutput {
    expression_id: String,
    infix: String,
    postfix: String,
    status: String,
    result: Option<f64>,
    owner_id: Option<u64>,
    created_at_ms: i64,
    solved_at_ms: Option<i64>,
}

#[derive(Serialize)]
struct ResultOutput {
    expression_id: String,
    status: String,
    result: Option<f64>,
}

#[derive(Serialize)]
struct AgentOutput {
    agent_id: u64,
    status: String,
    last_heartbeat_ms: i64,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn postfix_to_string(tokens: &[RpnToken]) -> String {
    tokens
        .iter()
        .map(|t| t.value.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn expression_output(info: ExpressionInfo) -> ExpressionOutput {
    ExpressionOutput {
        postfix: postfix_to_string(&info.postfix),
        expression_id: info.expression_id,
        infix: info.infix,
        status: info.status,
        result: info.result,
        owner_id: info.owner_id,
        created_at_ms: info.created_at_ms,
        solved_at_ms: info.solved_at_ms,
    }
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "-".to_string())
}

async fn connect(args: &ClientArgs) -> Result<CalculatorClient<Channel>, Box<dyn std::error::Error>> {
    let channel = Channel::from_shared(args.addr.clone())?.connect().await?;
    Ok(CalculatorClient::new(channel))
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_orchestrator(args: OrchestratorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = OrchestratorConfig {
        listen_addr,
        agent_timeout_ms: args.agent_timeout_ms,
        reap_interval_ms: args.reap_interval_ms,
        max_expressions: args.max_expressions,
    };

    tracing::info!(listen_addr = %config.listen_addr, "Starting distcalc orchestrator");

    let shutdown = install_shutdown_handler()?;
    OrchestratorNode::new(config).run(shutdown).await?;
    Ok(())
}

async fn run_agent(args: AgentArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let durations = DurationTable::default().with_overrides(&args.durations)?;
    let config = AgentConfig::new(args.orchestrator)
        .with_calculation_units(args.units)
        .with_durations(durations)
        .with_poll_interval_ms(args.poll_interval_ms)
        .with_heartbeat_interval_ms(args.heartbeat_interval_ms)
        .with_subtask_timeout_ms(args.subtask_timeout_ms)
        .with_retry(RetryConfig {
            max_attempts: args.retries,
            per_attempt_timeout_ms: args.attempt_timeout_ms,
            ..RetryConfig::default()
        });

    tracing::info!(
        orchestrator = %config.orchestrator_addr,
        units = config.calculation_units,
        durations = ?config.durations,
        "Starting distcalc agent"
    );

    let shutdown = install_shutdown_handler()?;
    AgentNode::new(config)?.run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_submit(
    client: &mut CalculatorClient<Channel>,
    infix: String,
    owner_id: Option<u64>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = match client
        .submit_expression(SubmitExpressionRequest { infix, owner_id })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => {
            eprintln!("Error: Expression rejected: {}", status.message());
            std::process::exit(1);
        }
    };

    match output_format {
        OutputFormat::Json => {
            let output = SubmitOutput {
                expression_id: response.expression_id,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Expression submitted successfully!");
            println!("Expression ID: {}", response.expression_id);
        }
    }
    Ok(())
}

async fn handle_get(
    client: &mut CalculatorClient<Channel>,
    expression_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = client
        .get_expression(ExpressionId { expression_id })
        .await?
        .into_inner();
    let output = expression_output(info);

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Expression ID: {}", output.expression_id);
            println!("Infix:         {}", output.infix);
            println!("Postfix:       {}", output.postfix);
            println!("Status:        {}", output.status);
            if let Some(result) = output.result {
                println!("Result:        {}", result);
            }
            if let Some(owner_id) = output.owner_id {
                println!("Owner:         {}", owner_id);
            }
            println!("Created:       {}", format_ms(output.created_at_ms));
            if let Some(solved_at_ms) = output.solved_at_ms {
                println!("Solved:        {}", format_ms(solved_at_ms));
            }
        }
    }
    Ok(())
}

async fn handle_list(
    client: &mut CalculatorClient<Channel>,
    owner_id: Option<u64>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .list_expressions(ListExpressionsRequest { owner_id })
        .await?
        .into_inner();
    let expressions: Vec<ExpressionOutput> = response
        .expressions
        .into_iter()
        .map(expression_output)
        .collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&expressions)?);
        }
        OutputFormat::Table => {
            if expressions.is_empty() {
                println!("No expressions found.");
                return Ok(());
            }
            println!("{:<32} {:<12} {:<14} INFIX", "EXPRESSION ID", "STATUS", "RESULT");
            println!("{}", "-".repeat(80));
            for expr in &expressions {
                let id = if expr.expression_id.len() > 30 {
                    format!("{}...", &expr.expression_id[..27])
                } else {
                    expr.expression_id.clone()
                };
                let result = expr
                    .result
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<32} {:<12} {:<14} {}", id, expr.status, result, expr.infix);
            }
            println!();
            println!("{} expressions", expressions.len());
        }
    }
    Ok(())
}

async fn handle_result(
    client: &mut CalculatorClient<Channel>,
    expression_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_result(ExpressionId { expression_id })
        .await?
        .into_inner();
    let output = ResultOutput {
        expression_id: response.expression_id,
        status: response.status,
        result: response.ready.then_some(response.result),
    };

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => match output.result {
            Some(result) => println!("{}", result),
            None => println!("Not ready (status: {})", output.status),
        },
    }
    Ok(())
}

async fn handle_agents_list(
    client: &mut CalculatorClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client.list_agents(Empty {}).await?.into_inner();
    let agents: Vec<AgentOutput> = response
        .agents
        .into_iter()
        .map(|a| AgentOutput {
            agent_id: a.agent_id,
            status: a.status,
            last_heartbeat_ms: a.last_heartbeat_ms,
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&agents)?);
        }
        OutputFormat::Table => {
            if agents.is_empty() {
                println!("No agents registered.");
                return Ok(());
            }
            println!("{:<8} {:<40} LAST HEARTBEAT", "ID", "STATUS");
            println!("{}", "-".repeat(75));
            for agent in &agents {
                println!(
                    "{:<8} {:<40} {}",
                    agent.agent_id,
                    agent.status,
                    format_ms(agent.last_heartbeat_ms)
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Orchestrator(orchestrator_args) => {
            run_orchestrator(orchestrator_args).await?;
        }
        Commands::Agent(agent_args) => {
            run_agent(agent_args).await?;
        }
        Commands::Expr { client, command } => {
            let mut grpc_client = connect(&client).await?;

            match command {
                ExprCommands::Submit { infix, owner } => {
                    handle_submit(&mut grpc_client, infix, owner, &client.output).await?;
                }
                ExprCommands::Get { expression_id } => {
                    handle_get(&mut grpc_client, expression_id, &client.output).await?;
                }
                ExprCommands::List { owner } => {
                    handle_list(&mut grpc_client, owner, &client.output).await?;
                }
                ExprCommands::Result { expression_id } => {
                    handle_result(&mut grpc_client, expression_id, &client.output).await?;
                }
            }
        }
        Commands::Agents { client, command } => {
            let mut grpc_client = connect(&client).await?;

            match command {
                AgentsCommands::List => {
                    handle_agents_list(&mut grpc_client, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
