use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{broadcast, Mutex};

use crate::clock::SharedClock;
use crate::error::Result;
use crate::interfaces::scheduler::ScheduledJob;
use crate::reminders::{FiredAlert, ReminderEngine};

/// Arms today's reminders on the first run and again whenever the local date rolls over.
pub struct ArmRemindersJob {
    engine: Arc<ReminderEngine>,
    clock: SharedClock,
    interval: Duration,
    last_armed: Mutex<Option<NaiveDate>>,
}

impl ArmRemindersJob {
    pub fn new(engine: Arc<ReminderEngine>, clock: SharedClock, interval: Duration) -> Self {
        Self {
            engine,
            clock,
            interval,
            last_armed: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ScheduledJob for ArmRemindersJob {
    fn name(&self) -> &str {
        "arm_reminders"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<()> {
        let today = self.clock.today();
        let mut last = self.last_armed.lock().await;
        if *last == Some(today) {
            return Ok(());
        }
        let report = self.engine.arm_for_date(today).await?;
        tracing::debug!(date = %report.date, "Arm job ran");
        *last = Some(today);
        Ok(())
    }
}

/// Runs the nag cadence and broadcasts whatever fired.
pub struct NagTickJob {
    engine: Arc<ReminderEngine>,
    interval: Duration,
    alerts: broadcast::Sender<FiredAlert>,
}

impl NagTickJob {
    pub fn new(
        engine: Arc<ReminderEngine>,
        interval: Duration,
        alerts: broadcast::Sender<FiredAlert>,
    ) -> Self {
        Self {
            engine,
            interval,
            alerts,
        }
    }
}

#[async_trait]
impl ScheduledJob for NagTickJob {
    fn name(&self) -> &str {
        "nag_tick"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<()> {
        let fired = self.engine.tick().await?;
        for alert in fired {
            tracing::debug!(reminder_id = alert.reminder_id, key = %alert.reminder_key, "Reminder fired");
            let _ = self.alerts.send(alert);
        }
        Ok(())
    }
}
