use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tracing::{error, info};

use crate::config::RunOptions;

/// Time from `now` until the next `hour:00` in a fixed UTC offset.
///
/// Once the hour has started the next run is the same hour tomorrow.
pub fn next_run_delay(now: DateTime<Utc>, hour: u32, utc_offset_hours: i32) -> Result<Duration> {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .ok_or_else(|| anyhow!("invalid UTC offset {}", utc_offset_hours))?;
    let local = now.with_timezone(&offset);

    let today = local
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .ok_or_else(|| anyhow!("invalid run hour {}", hour))?;
    let mut target = offset
        .from_local_datetime(&today)
        .single()
        .ok_or_else(|| anyhow!("ambiguous local time {}", today))?;
    if target <= local {
        target += chrono::Duration::days(1);
    }

    (target - local)
        .to_std()
        .map_err(|e| anyhow!("negative wait until {}: {}", target, e))
}

/// Run `job` right away if configured, then once a day at the configured hour.
/// A failed run is logged and the schedule carries on.
pub async fn run_daily<F, Fut>(options: &RunOptions, mut job: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if options.run_right_away {
        info!("Data collector running once...");
        report(job().await);
    }

    info!(
        "Data collector running at hour {} (UTC{:+}) every day...",
        options.run_at_hour, options.utc_offset_hours
    );
    loop {
        let wait = next_run_delay(Utc::now(), options.run_at_hour, options.utc_offset_hours)?;
        info!("Will run in {}", format_duration(wait));
        tokio::time::sleep(wait).await;
        report(job().await);
    }
}

fn report(result: Result<()>) {
    if let Err(e) = result {
        error!("Collection run failed: {:#}", e);
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
