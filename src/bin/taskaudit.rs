//! taskaudit CLI: run the worker and the monitor, submit tasks, inspect the
//! audit log.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use task_audit::config::Config;
use task_audit::db::Db;
use task_audit::dispatch::{Dispatch, PgmqEngine, TaskEngine};
use task_audit::model::{RecordFilter, RecordId, Status, TaskExecutionRecord};
use task_audit::monitor::Monitor;
use task_audit::recorder::Recorder;
use task_audit::store::AuditStore;
use task_audit::tasks::ProcessData;
use task_audit::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use task_audit::worker::{TaskRegistry, Worker};

#[derive(Parser)]
#[command(name = "taskaudit", about = "Task execution audit log and reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume the task queue
    Worker {
        /// Maximum concurrent tasks
        #[arg(long, default_value_t = 4)]
        max_concurrent: usize,
    },
    /// Run periodic reconciliation sweeps
    Monitor,
    /// Run a single reconciliation sweep and exit
    Sweep {
        /// Staleness threshold in minutes (defaults to the configured one)
        #[arg(long)]
        threshold_mins: Option<u64>,
    },
    /// Enqueue a task
    Submit {
        /// Task kind
        kind: String,
        /// JSON arguments (object for named, array for positional)
        #[arg(long)]
        args: Option<String>,
    },
    /// Audit record operations
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },
}

#[derive(Subcommand)]
enum RecordsAction {
    /// List records, newest first
    List {
        /// Filter by status (pending, completed, failed)
        #[arg(long)]
        status: Option<String>,
        /// Maximum records to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one record
    Show {
        /// Record id
        id: i64,
    },
    /// All attempts of one logical task
    History {
        /// Correlation id
        correlation_id: uuid::Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Worker { max_concurrent } => {
            let _guard = telemetry(&config, "taskaudit-worker")?;
            cmd_worker(&config, max_concurrent).await
        }
        Command::Monitor => {
            let _guard = telemetry(&config, "taskaudit-monitor")?;
            cmd_monitor(&config).await
        }
        Command::Sweep { threshold_mins } => {
            let _guard = telemetry(&config, "taskaudit-monitor")?;
            cmd_sweep(&config, threshold_mins).await
        }
        Command::Submit { kind, args } => {
            let db = connect(&config).await?;
            cmd_submit(&config, db, kind, args).await
        }
        Command::Records { action } => {
            let db = connect(&config).await?;
            match action {
                RecordsAction::List { status, limit } => cmd_records_list(&db, status, limit).await,
                RecordsAction::Show { id } => cmd_records_show(&db, id).await,
                RecordsAction::History { correlation_id } => {
                    cmd_records_history(&db, correlation_id).await
                }
            }
        }
    }
}

fn telemetry(config: &Config, service_name: &str) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: service_name.to_string(),
        log_level: config.log_level.clone(),
    })?)
}

async fn connect(config: &Config) -> anyhow::Result<Db> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.create_queue(&config.task_queue).await?;
    Ok(db)
}

fn engine(config: &Config, db: Db) -> PgmqEngine {
    PgmqEngine::new(db, config.task_queue.clone(), config.max_deliveries)
}

async fn cmd_worker(config: &Config, max_concurrent: usize) -> anyhow::Result<()> {
    let db = connect(config).await?;

    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(ProcessData::default()))?;

    let recorder = Recorder::new(Arc::new(db.clone()));
    let worker_config = task_audit::worker::WorkerConfig {
        max_concurrent,
        ..config.worker()
    };
    let worker = Worker::new(db, recorder, Arc::new(registry), worker_config);

    let w = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        w.shutdown();
    });

    worker.run().await?;
    Ok(())
}

fn monitor(config: &Config, db: Db) -> Monitor {
    let store: Arc<dyn AuditStore> = Arc::new(db.clone());
    let engine: Arc<dyn TaskEngine> = Arc::new(engine(config, db));
    Monitor::new(store, engine, config.monitor())
}

async fn cmd_monitor(config: &Config) -> anyhow::Result<()> {
    let db = connect(config).await?;
    let monitor = monitor(config, db);

    let m = monitor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        m.shutdown();
    });

    monitor.run().await?;
    Ok(())
}

async fn cmd_sweep(config: &Config, threshold_mins: Option<u64>) -> anyhow::Result<()> {
    let db = connect(config).await?;
    let monitor = monitor(config, db);
    let threshold = threshold_mins
        .map(task_audit::config::minutes)
        .unwrap_or(config.staleness_threshold);

    let report = monitor.sweep(threshold).await?;
    println!(
        "candidates: {}  left: {}  repaired: {}  rearmed: {}  abandoned: {}  conflicts: {}  errors: {}",
        report.candidates,
        report.left,
        report.repaired,
        report.rearmed,
        report.abandoned,
        report.conflicts,
        report.errors
    );
    Ok(())
}

async fn cmd_submit(config: &Config, db: Db, kind: String, args: Option<String>) -> anyhow::Result<()> {
    let args: serde_json::Value = match args {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::json!({}),
    };

    let dispatch = Dispatch::new(kind, args);
    let handle = engine(config, db).submit(&dispatch).await?;
    println!("Submitted: handle {handle} (correlation {})", dispatch.correlation_id);
    Ok(())
}

async fn cmd_records_list(db: &Db, status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let status: Option<Status> = match status {
        Some(s) => Some(s.parse().map_err(|_| anyhow::anyhow!("invalid status: {s}"))?),
        None => None,
    };

    let records = db
        .list(&RecordFilter {
            status,
            limit,
            ..RecordFilter::default()
        })
        .await?;
    print_table(&records);
    Ok(())
}

async fn cmd_records_history(db: &Db, correlation_id: uuid::Uuid) -> anyhow::Result<()> {
    let mut records = db
        .list(&RecordFilter {
            correlation_id: Some(correlation_id),
            limit: 1000,
            ..RecordFilter::default()
        })
        .await?;
    records.reverse();
    print_table(&records);
    Ok(())
}

fn print_table(records: &[TaskExecutionRecord]) {
    if records.is_empty() {
        println!("No records found.");
        return;
    }

    println!(
        "{:<8}  {:<14}  {:<16}  {:<10}  {:<5}  {:<8}  CREATED",
        "ID", "HANDLE", "KIND", "STATUS", "RETRY", "RECLAIMS"
    );
    println!("{}", "-".repeat(90));

    for r in records {
        println!(
            "{:<8}  {:<14}  {:<16}  {:<10}  {:<5}  {:<8}  {}",
            r.id,
            r.task_handle,
            r.task_kind,
            r.status,
            r.retryable,
            r.reclaim_count,
            r.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} record(s)", records.len());
}

async fn cmd_records_show(db: &Db, id: i64) -> anyhow::Result<()> {
    let r = db.get(RecordId(id)).await?;

    println!("ID:           {}", r.id);
    println!("Handle:       {}", r.task_handle);
    println!("Kind:         {}", r.task_kind);
    println!("Correlation:  {}", r.correlation_id);
    println!("Status:       {}", r.status);
    println!("Completed:    {}", r.completed);
    println!("Retryable:    {}", r.retryable);
    println!("Remarks:      {}", if r.remarks.is_empty() { "-" } else { &r.remarks });
    println!(
        "Retry Handle: {}",
        r.retry_handle.as_ref().map(|h| h.to_string()).unwrap_or("-".to_string())
    );
    println!("Reclaims:     {}", r.reclaim_count);
    println!("Version:      {}", r.version);
    println!("Payload:      {}", r.request_payload);
    println!("Created:      {}", r.created_at);
    println!("Updated:      {}", r.updated_at);
    Ok(())
}
