// src/allocation_timer.rs
use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::daily_run::DailyAssignmentRunner;

/// Time left until the next `hour:00:00` strictly after `now`.
/// Returns `None` for an hour outside `0..24`.
pub fn duration_until_next_run(now: NaiveDateTime, hour: u32) -> Option<Duration> {
    let run_time = NaiveTime::from_hms_opt(hour, 0, 0)?;
    let mut next = now.date().and_time(run_time);
    if next <= now {
        next += TimeDelta::days(1);
    }
    (next - now).to_std().ok()
}

/// Fires the daily run for "today" once a day at `hour` local time.
pub async fn run_daily_allocation(runner: Arc<DailyAssignmentRunner>, hour: u32) {
    info!("Starting daily allocation timer (runs at {:02}:00 local time)", hour);

    loop {
        let wait = match duration_until_next_run(Local::now().naive_local(), hour) {
            Some(wait) => wait,
            None => {
                error!("DAILY_RUN_HOUR {} is not a valid hour, timer stopped", hour);
                return;
            }
        };
        info!("Next daily allocation run in {} seconds", wait.as_secs());
        sleep(wait).await;

        let report = runner.run(runner.today()).await;
        if report.success {
            info!("Scheduled run for {} succeeded: {}", report.date, report.message);
        } else {
            warn!("Scheduled run for {} did not succeed: {}", report.date, report.message);
        }
    }
}
