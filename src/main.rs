use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crm_pilot::agent::{AbortReason, RunStatus};
use crm_pilot::executor::ActionExecutor;
use crm_pilot::operator::header;
use crm_pilot::prompts::{customer_lookup_prompt, RISK_ANALYSIS_PROMPT};
use crm_pilot::snapshot::DiskSnapshotStore;
use crm_pilot::{
    AgentError, AutomationEngine, BrowserConfig, ChromiumComputer, Computer, ConsoleOperator, CuaClient, CuaConfig,
    EngineConfig, Operator, Settings,
};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crm-pilot", about = "Drive a web CRM with a computer-use model")]
struct Cli {
    /// Start page, overrides DEFAULT_CRM_URL
    #[arg(long, global = true)]
    url: Option<String>,
    #[arg(long, global = true)]
    headless: bool,
    #[arg(long, global = true)]
    max_iterations: Option<usize>,
    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    task: Option<Task>,
}

#[derive(Subcommand, Debug)]
enum Task {
    /// Log in, fill the risk analysis form and read back the score
    RiskAnalysis,
    /// Find the CRM reference of a customer
    CustomerLookup {
        #[arg(long)]
        customer_id: String,
        #[arg(long, default_value = "demo")]
        username: String,
        #[arg(long, default_value = "123")]
        password: String,
    },
}

impl Task {
    fn title(&self) -> String {
        match self {
            Task::RiskAnalysis => "RISK SCORE ANALYSIS".to_string(),
            Task::CustomerLookup { customer_id, .. } => format!("FIND CUSTOMER {customer_id}"),
        }
    }

    fn prompt(&self) -> String {
        match self {
            Task::RiskAnalysis => RISK_ANALYSIS_PROMPT.to_string(),
            Task::CustomerLookup { customer_id, username, password } => {
                customer_lookup_prompt(customer_id, username, password)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(url) = cli.url {
        settings.crm_url = url;
    }
    if cli.headless {
        settings.browser_headless = true;
    }
    if let Some(n) = cli.max_iterations {
        settings.max_iterations = n;
    }
    settings.validate()?;

    let task = cli.task.unwrap_or(Task::RiskAnalysis);
    let operator = ConsoleOperator::new(settings.operator_timeout());
    operator.show(&header(&task.title(), 50));

    // One client for the whole process, dropped when main returns.
    let planner = CuaClient::new(CuaConfig::from_settings(&settings))?;
    let computer = ChromiumComputer::launch(BrowserConfig::from_settings(&settings), settings.default_wait())
        .await
        .context("failed to launch browser")?;

    let outcome: Result<_, AgentError> = async {
        computer.navigate(&settings.crm_url).await?;
        let mut engine = AutomationEngine::new(&planner, &computer, &operator, EngineConfig::from_settings(&settings))
            .with_executor(ActionExecutor::new(settings.default_wait()));
        if let Some(dir) = &settings.snapshot_dir {
            engine = engine.with_snapshot_store(Arc::new(DiskSnapshotStore::new(dir)));
        }
        engine.run(&task.prompt()).await
    }
    .await;

    if let Err(e) = computer.close().await {
        warn!(error = %e, "browser did not close cleanly");
    }
    let report = outcome?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    match &report.status {
        RunStatus::Done => {
            operator.show(&header("FINAL RESULT:", 50));
            operator.show(report.final_message.as_deref().unwrap_or("(no message)"));
        }
        RunStatus::Aborted(AbortReason::Error { message }) => {
            operator.show(&format!("Run aborted: {message}"));
        }
        RunStatus::Aborted(_) => operator.show("Stopped by user."),
        RunStatus::Exhausted => operator.show("Iteration limit reached."),
    }
    operator.show(&format!("Computer use loop completed after {} iterations", report.iterations));
    Ok(())
}
