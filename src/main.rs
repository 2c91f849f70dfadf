use std::sync::Arc;

use clap::{Parser, Subcommand};

use kitchen_pa::clock::{format_date, parse_iso_date, Clock, SharedClock, SystemClock};
use kitchen_pa::config::Config;
use kitchen_pa::error::Result;
use kitchen_pa::events::EventStore;
use kitchen_pa::reminders::{ReminderEngine, ReminderStore};
use kitchen_pa::services::today::{compose_summary, summary_alerts, TodaySummary};
use kitchen_pa::tasks::TaskStore;
use kitchen_pa::workdays::WorkdayStore;

#[derive(Parser, Debug)]
#[command(name = "kitchen-pa")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("KITCHEN_PA_GIT_SHA"), ")"))]
#[command(about = "Household assistant daemon and maintenance commands")]
struct Cli {
    #[arg(long, env = "KITCHEN_PA_CONFIG", default_value_t = kitchen_pa::runtime_paths::default_config_path())]
    config: String,

    #[arg(long, env = "KITCHEN_PA_DB", default_value_t = kitchen_pa::runtime_paths::default_db_path())]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP daemon with the reminder ticker.
    Serve,
    /// Arm reminders for a date (default today) and exit.
    Arm {
        #[arg(long)]
        date: Option<String>,
    },
    /// Print today's summary.
    Today {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

struct Stores {
    tasks: Arc<TaskStore>,
    events: Arc<EventStore>,
    workdays: Arc<WorkdayStore>,
    reminders: Arc<ReminderStore>,
}

async fn open_stores(config: &Config) -> Result<Stores> {
    let pool = kitchen_pa::db::open_pool(&config.sqlite_path()).await?;
    Ok(Stores {
        tasks: Arc::new(TaskStore::with_pool(pool.clone())),
        events: Arc::new(EventStore::with_pool(pool.clone())),
        workdays: Arc::new(WorkdayStore::with_pool(pool.clone())),
        reminders: Arc::new(ReminderStore::with_pool(pool)),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    kitchen_pa::logging::init_tracing("kitchen_pa");
    let cli = Cli::parse();
    let config = Config::load(&cli.config, &cli.db)?;

    match cli.command {
        Command::Serve => kitchen_pa::daemon::run(config).await,
        Command::Arm { date } => {
            let clock: SharedClock = Arc::new(SystemClock::new(config.timezone()?));
            let stores = open_stores(&config).await?;
            stores.reminders.seed_defaults_if_empty().await?;
            let engine = ReminderEngine::new(
                stores.reminders,
                stores.events,
                stores.workdays,
                clock.clone(),
                config.user_name(),
            );
            let date = match date {
                Some(raw) => parse_iso_date(&raw)?,
                None => clock.today(),
            };
            let report = engine.arm_for_date(date).await?;
            println!(
                "Armed {} schedule and {} event reminder(s) for {}",
                report.schedules_armed, report.events_armed, report.date
            );
            Ok(())
        }
        Command::Today { json } => {
            let clock = SystemClock::new(config.timezone()?);
            let stores = open_stores(&config).await?;
            let date = format_date(clock.today());
            let events = stores.events.list_for_date(&date).await?;
            let tasks = stores.tasks.list_open().await?;
            let alerts = summary_alerts(stores.reminders.list_for_date(&date).await?);
            let text = compose_summary(&events, &tasks, &alerts);
            if json {
                let summary = TodaySummary {
                    date,
                    text,
                    events,
                    tasks,
                    alerts,
                };
                let rendered = serde_json::to_string_pretty(&summary).map_err(|e| {
                    kitchen_pa::error::KitchenPaError::Serialization(e.to_string())
                })?;
                println!("{rendered}");
            } else {
                println!("{text}");
            }
            Ok(())
        }
    }
}
