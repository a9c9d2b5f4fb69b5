//! Goalpost CLI - Command line interface for goals, tasks and todos.
//!
//! Every edit lands in the local database first and is pushed to the backend
//! by `sync` or by a running `daemon`.

mod config;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use goalpost_common::{
    timestamp_now, EntityId, EntityKind, Fields, GoalFields, GoalPatch, Priority, Record,
    RepeatConfig, RepeatUnit, SyncStatus, TaskFields, TaskPatch, TodoFields, TodoPatch,
    TodoStatus,
};
use goalpost_gateway::{HttpGateway, RemoteGateway};
use goalpost_store::{reorder_goals, EntityStore, KindSummary, SqliteStore};
use goalpost_sync::{
    EngineStatus, Resolution, SyncEngine, SyncOutcome, SyncReport, SyncScheduler,
    SYNC_FAILED_MESSAGE,
};

use crate::config::{AppConfig, BACKEND_URL_ENV};

type Engine = SyncEngine<SqliteStore, HttpGateway>;

#[derive(Parser)]
#[command(name = "goalpost")]
#[command(about = "Goalpost - Offline-first goals, tasks and todos")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <data dir>/goalpost/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage goals.
    Goal {
        #[command(subcommand)]
        command: GoalCommand,
    },

    /// Manage tasks.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Manage todos.
    Todo {
        #[command(subcommand)]
        command: TodoCommand,
    },

    /// Run one sync pass with the backend.
    Sync,

    /// Show pending work and the last sync.
    Status,

    /// List records changed both locally and remotely.
    Conflicts,

    /// Settle a conflicting record.
    Resolve {
        /// Entity kind: goal, task or todo.
        kind: EntityKind,

        /// Record id.
        id: EntityId,

        /// Copy to keep: "local" or "remote".
        #[arg(short, long)]
        keep: Resolution,
    },

    /// Purge deletes the backend has already acknowledged.
    Gc,

    /// Sync periodically until interrupted.
    Daemon,
}

#[derive(Subcommand)]
enum GoalCommand {
    /// Create a goal at the end of the ranking.
    Add {
        /// Goal name.
        name: String,

        /// Longer description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List goals by rank.
    List,

    /// Edit a goal.
    Update {
        /// Goal id.
        id: EntityId,

        /// New name.
        #[arg(short, long)]
        name: Option<String>,

        /// New description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a goal.
    Delete {
        /// Goal id.
        id: EntityId,
    },

    /// Rank goals in the given order, first id first.
    Reorder {
        /// Goal ids in their new order.
        #[arg(required = true)]
        ids: Vec<EntityId>,

        /// Also send the new order to the backend right away.
        #[arg(long)]
        push: bool,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a task.
    Add {
        /// What needs doing.
        description: String,

        /// Owning goal id.
        #[arg(short, long)]
        goal: Option<EntityId>,

        /// Priority.
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<NaiveDate>,

        #[command(flatten)]
        repeat: RepeatArgs,
    },

    /// List tasks.
    List {
        /// Only tasks of this goal.
        #[arg(short, long)]
        goal: Option<EntityId>,
    },

    /// Edit a task.
    Update {
        /// Task id.
        id: EntityId,

        /// New description.
        #[arg(short, long)]
        description: Option<String>,

        /// New priority.
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,

        /// Completion percentage (0-100).
        #[arg(long)]
        progress: Option<u8>,

        /// Move to another goal.
        #[arg(short, long)]
        goal: Option<EntityId>,
    },

    /// Delete a task.
    Delete {
        /// Task id.
        id: EntityId,
    },
}

#[derive(Subcommand)]
enum TodoCommand {
    /// Create a todo.
    Add {
        /// Todo title.
        title: String,

        /// Longer description.
        #[arg(short, long)]
        description: Option<String>,

        /// Due date (YYYY-MM-DD).
        #[arg(long)]
        due: Option<NaiveDate>,

        /// Priority.
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,

        #[command(flatten)]
        repeat: RepeatArgs,
    },

    /// List open todos.
    List {
        /// Include completed todos.
        #[arg(short, long)]
        all: bool,
    },

    /// Mark a todo completed.
    Done {
        /// Todo id.
        id: EntityId,

        /// Reopen instead.
        #[arg(long)]
        undo: bool,
    },

    /// Delete a todo.
    Delete {
        /// Todo id.
        id: EntityId,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::High => Priority::High,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::Low => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnitArg {
    Day,
    Week,
    Month,
    Year,
}

impl From<UnitArg> for RepeatUnit {
    fn from(arg: UnitArg) -> Self {
        match arg {
            UnitArg::Day => RepeatUnit::Day,
            UnitArg::Week => RepeatUnit::Week,
            UnitArg::Month => RepeatUnit::Month,
            UnitArg::Year => RepeatUnit::Year,
        }
    }
}

#[derive(Debug, Args)]
struct RepeatArgs {
    /// Repeat every N units.
    #[arg(long, value_name = "N")]
    every: Option<u32>,

    /// Unit of the repeat interval.
    #[arg(long, value_enum, default_value = "day")]
    unit: UnitArg,

    /// Stop repeating after this date (YYYY-MM-DD).
    #[arg(long, value_name = "DATE")]
    until: Option<NaiveDate>,
}

impl RepeatArgs {
    fn into_config(self) -> RepeatConfig {
        match self.every {
            Some(interval) => RepeatConfig {
                repeat_end_date: self.until.map(start_of_day),
                ..RepeatConfig::every(interval, self.unit.into())
            },
            None => RepeatConfig::default(),
        }
    }
}

/// Short label used when listing records of any kind.
trait Title {
    fn title(&self) -> &str;
}

impl Title for GoalFields {
    fn title(&self) -> &str {
        &self.name
    }
}

impl Title for TaskFields {
    fn title(&self) -> &str {
        &self.description
    }
}

impl Title for TodoFields {
    fn title(&self) -> &str {
        &self.title
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AppConfig::load(cli.config).context("Failed to load configuration")?;

    match cli.command {
        Commands::Goal { command } => cmd_goal(&config, command).await,
        Commands::Task { command } => cmd_task(&config, command).await,
        Commands::Todo { command } => cmd_todo(&config, command).await,
        Commands::Sync => cmd_sync(&config).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Conflicts => cmd_conflicts(&config).await,
        Commands::Resolve { kind, id, keep } => cmd_resolve(&config, kind, &id, keep).await,
        Commands::Gc => cmd_gc(&config).await,
        Commands::Daemon => cmd_daemon(&config).await,
    }
}

/// Open the local database, creating its directory if needed.
fn open_store(config: &AppConfig) -> Result<Arc<SqliteStore>> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn open_gateway(config: &AppConfig) -> Result<HttpGateway> {
    if config.backend_base_url.trim().is_empty() {
        anyhow::bail!(
            "No backend configured. Set backend_base_url in the config file or {}",
            BACKEND_URL_ENV
        );
    }
    HttpGateway::new(config.gateway_config()).context("Invalid backend configuration")
}

fn build_engine(config: &AppConfig, store: Arc<SqliteStore>) -> Result<Arc<Engine>> {
    let gateway = open_gateway(config)?;
    Ok(Arc::new(SyncEngine::new(
        store,
        Arc::new(gateway),
        config.sync.clone(),
    )))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn sync_marker<F>(record: &Record<F>) -> &'static str {
    match record.meta.sync_status {
        SyncStatus::Synced => "",
        SyncStatus::Pending => " (pending)",
        SyncStatus::Conflict => " (conflict)",
    }
}

async fn delete_record<F: Fields>(store: &SqliteStore, id: &EntityId) -> Result<()>
where
    SqliteStore: EntityStore<F>,
{
    EntityStore::<F>::soft_delete(store, id)
        .await
        .with_context(|| format!("Failed to delete {} {}", F::KIND, id))?;
    println!("Deleted {} {}", F::KIND, id);
    Ok(())
}

/// Goal commands.
async fn cmd_goal(config: &AppConfig, command: GoalCommand) -> Result<()> {
    let store = open_store(config)?;

    match command {
        GoalCommand::Add { name, description } => {
            let active = EntityStore::<GoalFields>::list_active(&*store).await?;
            let order = active.iter().map(|g| g.fields.order).max().unwrap_or(0) + 1;

            let mut fields = GoalFields::new(name).with_order(order);
            fields.description = description;
            let goal = store
                .create(EntityId::generate(), fields)
                .await
                .context("Failed to create goal")?;
            println!("Created goal {} (#{})", goal.id, goal.fields.order);
        }

        GoalCommand::List => {
            let mut goals = EntityStore::<GoalFields>::list_active(&*store).await?;
            goals.sort_by_key(|g| g.fields.order);
            if goals.is_empty() {
                println!("No goals.");
            }
            for goal in goals {
                println!(
                    "  {:>3}. {}{}  [{}]",
                    goal.fields.order,
                    goal.fields.name,
                    sync_marker(&goal),
                    goal.id
                );
            }
        }

        GoalCommand::Update {
            id,
            name,
            description,
        } => {
            let patch = GoalPatch {
                name,
                description: description.map(Some),
                ..GoalPatch::default()
            };
            EntityStore::<GoalFields>::update(&*store, &id, patch)
                .await
                .context("Failed to update goal")?;
            println!("Updated goal {}", id);
        }

        GoalCommand::Delete { id } => delete_record::<GoalFields>(&store, &id).await?,

        GoalCommand::Reorder { ids, push } => {
            let orders = reorder_goals(&*store, &ids)
                .await
                .context("Failed to reorder goals")?;
            println!("Reordered {} goals", orders.len());

            if push {
                let gateway = open_gateway(config)?;
                gateway
                    .reorder_goals(&orders)
                    .await
                    .context("Failed to push goal order")?;
                println!("Pushed new order to {}", gateway.base_url());
            }
        }
    }

    Ok(())
}

/// Task commands.
async fn cmd_task(config: &AppConfig, command: TaskCommand) -> Result<()> {
    let store = open_store(config)?;

    match command {
        TaskCommand::Add {
            description,
            goal,
            priority,
            start,
            end,
            repeat,
        } => {
            if let Some(goal_id) = &goal {
                let owner = EntityStore::<GoalFields>::get_by_id(&*store, goal_id).await?;
                if !owner.is_some_and(|g| g.meta.is_active()) {
                    warn!("Goal {} is not known locally; creating task anyway", goal_id);
                }
            }

            let mut fields = TaskFields::new(description);
            fields.goal_id = goal;
            fields.priority = priority.map(Priority::from).unwrap_or_default();
            fields.start_date = start.map(start_of_day);
            fields.end_date = end.map(start_of_day);
            fields.repeat = repeat.into_config();

            let task = store
                .create(EntityId::generate(), fields)
                .await
                .context("Failed to create task")?;
            println!("Created task {}", task.id);
        }

        TaskCommand::List { goal } => {
            let tasks = EntityStore::<TaskFields>::list_active(&*store).await?;
            let tasks: Vec<_> = tasks
                .into_iter()
                .filter(|t| goal.is_none() || t.fields.goal_id == goal)
                .collect();
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in tasks {
                println!(
                    "  {:>3}% {}{}  [{}]",
                    task.fields.completion_percentage,
                    task.fields.description,
                    sync_marker(&task),
                    task.id
                );
            }
        }

        TaskCommand::Update {
            id,
            description,
            priority,
            progress,
            goal,
        } => {
            let mut patch = TaskPatch {
                description,
                priority: priority.map(Priority::from),
                completion_percentage: progress,
                goal_id: goal.map(Some),
                ..TaskPatch::default()
            };
            if let Some(progress) = progress {
                patch.actual_completion_date = Some((progress == 100).then(timestamp_now));
            }
            EntityStore::<TaskFields>::update(&*store, &id, patch)
                .await
                .context("Failed to update task")?;
            println!("Updated task {}", id);
        }

        TaskCommand::Delete { id } => delete_record::<TaskFields>(&store, &id).await?,
    }

    Ok(())
}

/// Todo commands.
async fn cmd_todo(config: &AppConfig, command: TodoCommand) -> Result<()> {
    let store = open_store(config)?;

    match command {
        TodoCommand::Add {
            title,
            description,
            due,
            priority,
            repeat,
        } => {
            let mut fields = TodoFields::new(title);
            fields.description = description;
            fields.due_date = due.map(start_of_day);
            fields.priority = priority.map(Priority::from).unwrap_or_default();
            fields.repeat = repeat.into_config();

            let todo = store
                .create(EntityId::generate(), fields)
                .await
                .context("Failed to create todo")?;
            println!("Created todo {}", todo.id);
        }

        TodoCommand::List { all } => {
            let todos = EntityStore::<TodoFields>::list_active(&*store).await?;
            let todos: Vec<_> = todos
                .into_iter()
                .filter(|t| all || t.fields.status == TodoStatus::Pending)
                .collect();
            if todos.is_empty() {
                println!("Nothing to do.");
            }
            for todo in todos {
                let check = match todo.fields.status {
                    TodoStatus::Completed => "x",
                    TodoStatus::Pending => " ",
                };
                let due = todo
                    .fields
                    .due_date
                    .map(|d| format!(" (due {})", d.format("%Y-%m-%d")))
                    .unwrap_or_default();
                println!(
                    "  [{}] {}{}{}  [{}]",
                    check,
                    todo.fields.title,
                    due,
                    sync_marker(&todo),
                    todo.id
                );
            }
        }

        TodoCommand::Done { id, undo } => {
            let patch = if undo {
                TodoPatch::reopen()
            } else {
                TodoPatch::complete(timestamp_now())
            };
            EntityStore::<TodoFields>::update(&*store, &id, patch)
                .await
                .context("Failed to update todo")?;
            println!("{} todo {}", if undo { "Reopened" } else { "Completed" }, id);
        }

        TodoCommand::Delete { id } => delete_record::<TodoFields>(&store, &id).await?,
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("Sync completed in {:?}", report.duration);
    println!("  Uploaded:   {}", report.uploaded);
    println!("  Downloaded: {}", report.downloaded);
    println!("  Tombstoned: {}", report.tombstoned);
    println!("  Conflicts:  {}", report.conflicts);
    if report.upload_failures > 0 {
        println!(
            "  Failed:     {} uploads (will retry next sync)",
            report.upload_failures
        );
    }
}

/// Run one sync pass.
async fn cmd_sync(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let engine = build_engine(config, store)?;

    info!("Syncing with {}", config.backend_base_url);
    match engine.sync().await.context(SYNC_FAILED_MESSAGE)? {
        SyncOutcome::Completed(report) => print_report(&report),
        SyncOutcome::Offline => {
            println!("Backend unreachable. Your changes are saved and will sync later.")
        }
        SyncOutcome::Skipped => println!("A sync is already running."),
    }

    Ok(())
}

async fn kind_status<F: Fields>(
    store: &SqliteStore,
) -> Result<(KindSummary, Option<DateTime<Utc>>)>
where
    SqliteStore: EntityStore<F>,
{
    let summary = EntityStore::<F>::summary(store).await?;
    let last_synced = EntityStore::<F>::list_all(store)
        .await?
        .iter()
        .filter_map(|r| r.meta.synced_at)
        .max();
    Ok((summary, last_synced))
}

/// Show local counts per kind.
async fn cmd_status(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;

    println!("Database: {}", config.database_path().display());
    if config.backend_base_url.is_empty() {
        println!("Backend:  (not configured)");
    } else {
        println!("Backend:  {}", config.backend_base_url);
    }

    let rows = [
        (EntityKind::Goal, kind_status::<GoalFields>(&store).await?),
        (EntityKind::Task, kind_status::<TaskFields>(&store).await?),
        (EntityKind::Todo, kind_status::<TodoFields>(&store).await?),
    ];

    println!();
    println!("  {:<8} {:>7} {:>8} {:>10} {:>11}", "", "active", "pending", "conflicts", "tombstoned");
    for (kind, (summary, _)) in &rows {
        println!(
            "  {:<8} {:>7} {:>8} {:>10} {:>11}",
            kind.collection(),
            summary.active,
            summary.pending,
            summary.conflicts,
            summary.tombstoned
        );
    }

    match rows.iter().filter_map(|(_, (_, last))| *last).max() {
        Some(last) => println!("\nLast synced: {}", last.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("\nNever synced."),
    }

    Ok(())
}

async fn print_conflicts<F: Fields + Title>(store: &SqliteStore) -> Result<usize>
where
    SqliteStore: EntityStore<F>,
{
    let conflicts = EntityStore::<F>::list_conflicts(store).await?;
    for record in &conflicts {
        println!("  {:<5} {}  {}", F::KIND.as_str(), record.id, record.fields.title());
    }
    Ok(conflicts.len())
}

/// List conflicting records.
async fn cmd_conflicts(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;

    let total = print_conflicts::<GoalFields>(&store).await?
        + print_conflicts::<TaskFields>(&store).await?
        + print_conflicts::<TodoFields>(&store).await?;

    if total == 0 {
        println!("No conflicts.");
    } else {
        println!("\nResolve with: goalpost resolve <kind> <id> --keep local|remote");
    }

    Ok(())
}

/// Settle one conflict.
async fn cmd_resolve(
    config: &AppConfig,
    kind: EntityKind,
    id: &EntityId,
    keep: Resolution,
) -> Result<()> {
    let store = open_store(config)?;
    let engine = build_engine(config, store)?;

    engine
        .resolve_conflict(kind, id, keep)
        .await
        .with_context(|| format!("Failed to resolve {} {}", kind, id))?;

    println!("Resolved {} {} keeping the {} copy", kind, id, keep);
    Ok(())
}

/// Drop rows with nothing left to reconcile.
async fn cmd_gc(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;

    let purged = EntityStore::<GoalFields>::purge_finalized(&*store).await?.len()
        + EntityStore::<TaskFields>::purge_finalized(&*store).await?.len()
        + EntityStore::<TodoFields>::purge_finalized(&*store).await?.len();

    println!("Purged {} records", purged);
    Ok(())
}

/// Run the scheduler until Ctrl-C.
async fn cmd_daemon(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let engine = build_engine(config, store)?;

    let _subscription = engine.subscribe(|state| match state.status {
        EngineStatus::Success => info!("Sync succeeded"),
        EngineStatus::Error => warn!(
            "{}",
            state.error_message.as_deref().unwrap_or(SYNC_FAILED_MESSAGE)
        ),
        EngineStatus::Idle | EngineStatus::Syncing => {}
    });

    let (scheduler, handle) =
        SyncScheduler::new(config.sync.sync_interval).context("Failed to start scheduler")?;
    let task = tokio::spawn(handle.run(Arc::clone(&engine)));

    println!(
        "Syncing with {} every {:?}. Press Ctrl-C to stop.",
        config.backend_base_url, config.sync.sync_interval
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    scheduler.shutdown().await;
    task.await.context("Scheduler task panicked")?;
    println!("Stopped.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_resolve() {
        let cli = Cli::try_parse_from(["goalpost", "resolve", "goal", "g1", "--keep", "remote"])
            .unwrap();
        match cli.command {
            Commands::Resolve { kind, id, keep } => {
                assert_eq!(kind, EntityKind::Goal);
                assert_eq!(id.as_str(), "g1");
                assert_eq!(keep, Resolution::KeepRemote);
            }
            _ => panic!("expected resolve"),
        }

        assert!(Cli::try_parse_from(["goalpost", "resolve", "habit", "g1", "--keep", "local"])
            .is_err());
    }

    #[test]
    fn test_parse_todo_with_repeat() {
        let cli = Cli::try_parse_from([
            "goalpost", "todo", "add", "Water plants", "--due", "2024-05-01", "--every", "2",
            "--unit", "week",
        ])
        .unwrap();
        let Commands::Todo {
            command: TodoCommand::Add { due, repeat, .. },
        } = cli.command
        else {
            panic!("expected todo add");
        };

        assert_eq!(due.map(start_of_day).unwrap().to_rfc3339(), "2024-05-01T00:00:00+00:00");
        let repeat = repeat.into_config();
        assert!(repeat.is_repeat);
        assert_eq!(repeat.repeat_interval, 2);
        assert_eq!(repeat.repeat_unit, RepeatUnit::Week);
    }

    #[test]
    fn test_no_repeat_by_default() {
        let repeat = RepeatArgs {
            every: None,
            unit: UnitArg::Month,
            until: None,
        };
        assert_eq!(repeat.into_config(), RepeatConfig::default());
    }

    #[test]
    fn test_reorder_requires_ids() {
        assert!(Cli::try_parse_from(["goalpost", "goal", "reorder"]).is_err());
        let cli = Cli::try_parse_from(["goalpost", "goal", "reorder", "c", "a", "b", "--push"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Goal {
                command: GoalCommand::Reorder { ref ids, push: true }
            } if ids.len() == 3
        ));
    }
}
