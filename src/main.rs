use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clinicflow::config::AppConfig;
use clinicflow::flows::{ExecutionFilter, FlowExecution};
use clinicflow::scheduler::{CancelOutcome, DelayUnit, FlowSchedule, FlowScheduler, ScheduleFilter, ScheduleStatus};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "clinicflow",
    about = "Deferred flow execution service for clinic patient journeys",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler engine)
    Serve {
        /// Bind address (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Manage deferred flow runs
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Manage flow definitions
    Flow {
        #[command(subcommand)]
        action: FlowAction,
    },

    /// Inspect flow executions
    Execution {
        #[command(subcommand)]
        action: ExecutionAction,
    },

    /// Re-arm pending schedules once and run the overdue ones, then exit
    Recover,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Schedule a flow run for a patient
    Add {
        #[arg(long)]
        flow: Uuid,

        #[arg(long)]
        patient: Uuid,

        /// Delay amount
        #[arg(long, allow_negative_numbers = true)]
        amount: i64,

        /// Delay unit: minutes, hours, days or weeks
        #[arg(long)]
        unit: DelayUnit,
    },

    /// List schedules
    List {
        /// Only this status: pending, executed or cancelled
        #[arg(long)]
        status: Option<ScheduleStatus>,

        #[arg(long)]
        patient: Option<Uuid>,
    },

    /// Show one schedule
    Show { id: Uuid },

    /// Cancel a pending schedule
    Cancel { id: Uuid },
}

#[derive(Subcommand)]
enum FlowAction {
    /// Register a flow from an editor JSON document
    Import {
        /// File holding the flow document (`{"nodes": [...], ...}`)
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        name: String,

        /// Reuse an existing flow id to replace its definition
        #[arg(long)]
        id: Option<Uuid>,
    },

    /// Print a stored flow
    Show { id: Uuid },
}

#[derive(Subcommand)]
enum ExecutionAction {
    /// List executions
    List {
        #[arg(long)]
        patient: Option<Uuid>,

        #[arg(long)]
        flow: Option<Uuid>,
    },
}

fn print_schedules(list: &[FlowSchedule]) {
    if list.is_empty() {
        println!("No schedules found.");
        return;
    }
    println!(
        "{:<36} | {:<36} | {:<36} | {:<25} | {:<10} | Status",
        "ID", "Flow", "Patient", "Scheduled for", "Delay"
    );
    println!("{:-<36}-|-{:-<36}-|-{:-<36}-|-{:-<25}-|-{:-<10}-|-{:-<9}", "", "", "", "", "", "");
    for s in list {
        println!(
            "{:<36} | {:<36} | {:<36} | {:<25} | {:<10} | {}",
            s.id,
            s.flow_id,
            s.patient_id,
            s.scheduled_for.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            format!("{} {}", s.delay_amount, s.delay_unit),
            s.status
        );
    }
}

fn print_executions(list: &[FlowExecution]) {
    if list.is_empty() {
        println!("No executions found.");
        return;
    }
    println!("{:<36} | {:<36} | {:<36} | {:<16} | Status", "ID", "Flow", "Patient", "Node");
    println!("{:-<36}-|-{:-<36}-|-{:-<36}-|-{:-<16}-|-{:-<9}", "", "", "", "", "");
    for e in list {
        println!(
            "{:<36} | {:<36} | {:<36} | {:<16} | {}",
            e.id,
            e.flow_id,
            e.patient_id,
            e.current_node_id.as_deref().unwrap_or("-"),
            e.status
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    clinicflow::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting clinicflow daemon");
            clinicflow::serve(config).await?;
        }
        Commands::Schedule { action } => {
            let pool = clinicflow::storage::open_pool(&config.database.path)?;
            let scheduler = FlowScheduler::new(pool);

            match action {
                ScheduleAction::Add { flow, patient, amount, unit } => {
                    let s = scheduler.schedule(flow, patient, amount, unit).await?;
                    // The daemon owns timers; this process exits before any would fire.
                    scheduler.timers().abort_all();
                    println!("Schedule {} created for {}.", s.id, s.scheduled_for.to_rfc3339());
                }
                ScheduleAction::List { status, patient } => {
                    let list = scheduler
                        .list_schedules(&ScheduleFilter { status, patient_id: patient })
                        .await?;
                    print_schedules(&list);
                }
                ScheduleAction::Show { id } => {
                    let s = scheduler.get_schedule(id).await?;
                    println!("{}", serde_json::to_string_pretty(&s)?);
                }
                ScheduleAction::Cancel { id } => match scheduler.cancel(id).await? {
                    CancelOutcome::Cancelled => println!("Schedule {} cancelled.", id),
                    CancelOutcome::AlreadyExecuted => {
                        anyhow::bail!("Schedule {} already executed", id)
                    }
                    CancelOutcome::AlreadyCancelled => println!("Schedule {} was already cancelled.", id),
                },
            }
        }
        Commands::Flow { action } => {
            let pool = clinicflow::storage::open_pool(&config.database.path)?;
            let scheduler = FlowScheduler::new(pool);

            match action {
                FlowAction::Import { file, name, id } => {
                    let raw = std::fs::read_to_string(&file)
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    let document: serde_json::Value = serde_json::from_str(&raw)
                        .with_context(|| format!("failed to parse {}", file.display()))?;
                    let flow = scheduler
                        .register_flow_document(id.unwrap_or_else(Uuid::new_v4), &name, document)
                        .await?;
                    match flow.entry_node() {
                        Some(entry) => println!("Flow {} registered (start node '{}').", flow.id, entry.id),
                        None => println!("Flow {} registered, but it has no start node and will never run.", flow.id),
                    }
                }
                FlowAction::Show { id } => {
                    let flow = scheduler.get_flow(id).await?;
                    println!("{}", serde_json::to_string_pretty(&flow)?);
                }
            }
        }
        Commands::Execution { action } => {
            let pool = clinicflow::storage::open_pool(&config.database.path)?;
            let scheduler = FlowScheduler::new(pool);

            match action {
                ExecutionAction::List { patient, flow } => {
                    let list = scheduler
                        .list_executions(&ExecutionFilter { patient_id: patient, flow_id: flow })
                        .await?;
                    print_executions(&list);
                }
            }
        }
        Commands::Recover => {
            let pool = clinicflow::storage::open_pool(&config.database.path)?;
            let scheduler = FlowScheduler::new(pool);
            let summary = scheduler.recover().await?;
            // Only the overdue runs matter for a one-shot pass.
            scheduler.timers().abort_all();
            println!(
                "Executed {} overdue schedule(s); {} still pending for the daemon.",
                summary.executed, summary.armed
            );
        }
    }

    Ok(())
}
