//! Command-line interface for the remedy decision engine.

mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use remedy_core::config::env_vars;
use remedy_core::{
    ApprovalStatus, AuditSink, Decision, DecisionFilter, DecisionStore, EngineConfig, Policy,
    PolicyStore, TracingAuditSink,
};
use remedy_engine::{Engine, EngineDeps};
use remedy_storage::Stores;

use crate::telemetry::FileTelemetrySource;

/// Remedy - autonomous remediation decisions with guardrails.
#[derive(Parser, Debug)]
#[command(name = "remedy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Engine configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding remedy.redb. Overrides the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Telemetry snapshot file (JSON).
    #[arg(short, long, global = true)]
    telemetry: Option<PathBuf>,

    /// Write audit events to the log instead of the database.
    #[arg(long, global = true)]
    audit_to_log: bool,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run one decision tick.
    Decide,
    /// Run one outcome evaluation tick.
    Evaluate,
    /// Expire pending decisions whose approval window has closed.
    Sweep,
    /// Run all ticks on their intervals until Ctrl-C.
    Run,
    /// Inspect or reset the bandit policy.
    Policy {
        #[command(subcommand)]
        policy_cmd: PolicyCommand,
    },
    /// Inspect or seed guardrails.
    Guardrails {
        #[command(subcommand)]
        guardrails_cmd: GuardrailsCommand,
    },
    /// Inspect recorded decisions.
    Decisions {
        #[command(subcommand)]
        decisions_cmd: DecisionsCommand,
    },
    /// Approve and execute a pending decision.
    Approve {
        /// Decision ID.
        id: String,
        /// Who approves.
        #[arg(long)]
        by: Option<String>,
    },
    /// Reject a pending decision.
    Reject {
        /// Decision ID.
        id: String,
        /// Why it was rejected.
        #[arg(short, long)]
        reason: String,
        /// Who rejects.
        #[arg(long)]
        by: Option<String>,
    },
    /// Show recent audit events.
    Audit {
        /// Maximum number of events.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show remediation jobs in the outbox.
    Jobs,
}

/// Policy subcommands.
#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Print the live policy.
    Show,
    /// Replace the live policy with a cold-start one.
    Reset,
}

/// Guardrail subcommands.
#[derive(Subcommand, Debug)]
enum GuardrailsCommand {
    /// List all guardrails by priority.
    List,
    /// Store the built-in rule set.
    SeedDefaults,
}

/// Decision subcommands.
#[derive(Subcommand, Debug)]
enum DecisionsCommand {
    /// List decisions, newest first.
    List {
        /// Only decisions waiting for approval.
        #[arg(long)]
        pending: bool,
        /// Maximum number of decisions.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one decision in full.
    Show {
        /// Decision ID.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    tracing::debug!(path = %config.database_path().display(), "Opening database");
    let stores = Stores::open(config.database_path())
        .with_context(|| format!("Failed to open {}", config.database_path().display()))?;

    match args.command {
        Command::Decide => {
            let engine = build_engine(&stores, config, &args.telemetry, args.audit_to_log)?;
            let report = engine.orchestrator.tick(Utc::now()).await;
            print_json(&report)
        }
        Command::Evaluate => {
            let engine = build_engine(&stores, config, &args.telemetry, args.audit_to_log)?;
            let report = engine.tracker.tick(Utc::now()).await;
            print_json(&report)
        }
        Command::Sweep => {
            let engine = build_engine(&stores, config, &args.telemetry, args.audit_to_log)?;
            let report = engine.approvals.expire_stale(Utc::now()).await;
            print_json(&report)
        }
        Command::Run => {
            let engine = build_engine(&stores, config, &args.telemetry, args.audit_to_log)?;
            run_scheduler(engine).await
        }
        Command::Policy { policy_cmd } => run_policy_cmd(&stores, policy_cmd).await,
        Command::Guardrails { guardrails_cmd } => run_guardrails_cmd(&stores, guardrails_cmd),
        Command::Decisions { decisions_cmd } => run_decisions_cmd(&stores, decisions_cmd).await,
        Command::Approve { id, by } => {
            let engine = build_engine(&stores, config, &args.telemetry, args.audit_to_log)?;
            let approval = engine
                .approvals
                .approve(&id, &approver(by), Utc::now())
                .await?;
            println!(
                "Approved {} ({}); job {} queued",
                approval.decision.id, approval.decision.action, approval.job_id
            );
            Ok(())
        }
        Command::Reject { id, reason, by } => {
            let engine = build_engine(&stores, config, &args.telemetry, args.audit_to_log)?;
            let decision = engine
                .approvals
                .reject(&id, &approver(by), &reason, Utc::now())
                .await?;
            println!("Rejected {} ({})", decision.id, decision.action);
            Ok(())
        }
        Command::Audit { limit } => {
            for event in stores.audit.list_recent(None, limit)? {
                println!(
                    "{}  {:<20} {:<36} {}",
                    event.at.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_value(&event.kind)?.as_str().unwrap_or("-"),
                    event.decision_id.as_deref().unwrap_or("-"),
                    event.message
                );
            }
            Ok(())
        }
        Command::Jobs => {
            let jobs = stores.jobs.list_jobs(None)?;
            if jobs.is_empty() {
                println!("No remediation jobs.");
            }
            for record in jobs {
                println!(
                    "{}  {:<10} {:<16} {:<20} decision={}",
                    record.job.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_value(&record.status)?.as_str().unwrap_or("-"),
                    record.job.action.as_str(),
                    record.job.target.as_deref().unwrap_or("-"),
                    record.job.decision_id
                );
            }
            Ok(())
        }
    }
}

/// Install the tracing subscriber: JSON when `REMEDY_LOG_JSON=true`, compact otherwise.
fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "remedy=debug" } else { "remedy=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn build_engine(
    stores: &Stores,
    config: EngineConfig,
    telemetry: &Option<PathBuf>,
    audit_to_log: bool,
) -> Result<Engine> {
    let source = Arc::new(FileTelemetrySource::new(telemetry.clone()));
    let audit: Arc<dyn AuditSink> = if audit_to_log {
        Arc::new(TracingAuditSink)
    } else {
        stores.audit.clone()
    };
    let deps = EngineDeps {
        telemetry: source.clone(),
        forecast: Some(source),
        policy: stores.policy.clone(),
        decisions: stores.decisions.clone(),
        guardrails: stores.guardrails.clone(),
        outcomes: stores.outcomes.clone(),
        leases: stores.leases.clone(),
        queue: stores.jobs.clone(),
        audit,
        targets: Arc::new(config.target_resolver()?),
    };
    Ok(Engine::new(deps, config))
}

async fn run_scheduler(engine: Engine) -> Result<()> {
    let scheduler = engine.scheduler();
    scheduler.start().await;
    println!("Remedy engine running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Stopping scheduler");
    scheduler.stop().await;
    Ok(())
}

async fn run_policy_cmd(stores: &Stores, cmd: PolicyCommand) -> Result<()> {
    match cmd {
        PolicyCommand::Show => match stores.policy.load_policy().await? {
            Some(policy) => {
                println!(
                    "Policy v{} ({} samples, updated {})",
                    policy.version,
                    policy.trained_samples,
                    policy.updated_at.to_rfc3339()
                );
                if !policy.is_compatible() {
                    println!(
                        "WARNING: policy does not match the current action set or feature layout"
                    );
                }
                print_json(&policy)
            }
            None => {
                println!("No policy stored yet; the first decision tick creates one.");
                Ok(())
            }
        },
        PolicyCommand::Reset => {
            let current = stores.policy.load_policy().await?;
            let expected = current.as_ref().map(|p| p.version);
            let mut fresh = Policy::cold_start(Utc::now());
            fresh.version = expected.map(|v| v + 1).unwrap_or(0);
            stores.policy.save_policy(&fresh, expected).await?;
            println!("Policy reset to cold start (v{}).", fresh.version);
            Ok(())
        }
    }
}

fn run_guardrails_cmd(stores: &Stores, cmd: GuardrailsCommand) -> Result<()> {
    match cmd {
        GuardrailsCommand::List => {
            let rules = stores.guardrails.list_all()?;
            if rules.is_empty() {
                println!("No guardrails stored; the built-in defaults apply.");
                return Ok(());
            }
            println!(
                "{:<5} {:<8} {:<18} {:<16} {:<7} NAME",
                "PRIO", "ENABLED", "POLICY", "ACTION", "RISK"
            );
            for rule in rules {
                println!(
                    "{:<5} {:<8} {:<18} {:<16} {:<7} {}",
                    rule.priority,
                    rule.enabled,
                    serde_json::to_value(&rule.policy)?.as_str().unwrap_or("-"),
                    rule.action.map(|a| a.to_string()).unwrap_or_else(|| "*".to_string()),
                    rule.risk.map(|r| r.to_string()).unwrap_or_else(|| "*".to_string()),
                    rule.name
                );
            }
            Ok(())
        }
        GuardrailsCommand::SeedDefaults => {
            let added = stores.guardrails.seed_defaults()?;
            println!("Seeded {} default guardrail(s).", added);
            Ok(())
        }
    }
}

async fn run_decisions_cmd(stores: &Stores, cmd: DecisionsCommand) -> Result<()> {
    match cmd {
        DecisionsCommand::List { pending, limit } => {
            let filter = DecisionFilter {
                approval_status: pending.then_some(ApprovalStatus::Pending),
                limit: Some(limit),
                ..Default::default()
            };
            let decisions = stores.decisions.query_decisions(filter).await?;
            if decisions.is_empty() {
                println!("No decisions.");
            }
            for decision in &decisions {
                println!("{}", summary_line(decision));
            }
            Ok(())
        }
        DecisionsCommand::Show { id } => {
            let decision = stores
                .decisions
                .get_decision(&id)
                .await?
                .with_context(|| format!("Decision {} not found", id))?;
            print_json(&decision)
        }
    }
}

fn summary_line(decision: &Decision) -> String {
    let reward = decision
        .reward
        .map(|r| format!("{:+.2}", r))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {}  {:<16} {:<20} {:<6} {:<13} executed={:<5} reward={}",
        decision.created_at.format("%Y-%m-%d %H:%M:%S"),
        decision.id,
        decision.action.as_str(),
        decision.target.as_deref().unwrap_or("-"),
        decision.risk.as_str(),
        decision.approval_status.as_str(),
        decision.executed,
        reward
    )
}

fn approver(by: Option<String>) -> String {
    by.or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "operator".to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
