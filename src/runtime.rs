//! Application runner: single runs and the clock-aligned continuous schedule.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::controls::ArchiveControls;
use crate::error::SnapshotError;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::snapshot::SnapshotBuilder;
use crate::upload::InternetArchiveUploader;

/// Pause before retrying after a failed scheduled run.
pub const RETRY_DELAY: Duration = Duration::from_secs(300);

/// Result of one archive check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new snapshot was written to this directory.
    Created(PathBuf),
    /// Content matched the latest snapshot; nothing was written.
    Unchanged,
}

/// Next wall-clock boundary strictly after `now` that is a multiple of `interval_hours` since
/// midnight. Boundaries at or past 24h roll over to the following midnight.
pub fn next_run_after(now: NaiveDateTime, interval_hours: u32) -> NaiveDateTime {
    let interval = interval_hours.clamp(1, 24);
    let next_hour = (now.hour() / interval + 1) * interval;
    let date = now.date();
    match NaiveTime::from_hms_opt(next_hour, 0, 0) {
        Some(time) if next_hour < 24 => date.and_time(time),
        _ => (date + TimeDelta::days(1)).and_time(NaiveTime::MIN),
    }
}

/// Builds the production archiver from `controls` and runs it once, or forever when `once`
/// is false.
pub fn run(controls: &ArchiveControls, once: bool) -> Result<Option<RunOutcome>> {
    let fetcher = HttpFetcher::new().context("failed to build HTTP client")?;
    let mut builder = SnapshotBuilder::from_controls(controls, fetcher).with_context(|| {
        format!(
            "failed to open output tree {}",
            controls.output_dir().display()
        )
    })?;
    if let Some(settings) = controls.internet_archive() {
        let uploader = InternetArchiveUploader::new(settings.access_key(), settings.secret_key())
            .context("Internet Archive upload enabled but not usable")?;
        builder = builder.with_uploader(uploader, settings.collection());
    }

    if once {
        let outcome = run_once(&mut builder, controls.pages()).context("snapshot run failed")?;
        return Ok(Some(outcome));
    }

    run_continuous(&mut builder, controls.pages(), controls.interval_hours(), &SystemClock);
    Ok(None)
}

/// Runs a single check-and-snapshot.
pub fn run_once<F: Fetcher>(
    builder: &mut SnapshotBuilder<F>,
    pages: &[String],
) -> Result<RunOutcome, SnapshotError> {
    Ok(match builder.run_snapshot(pages)? {
        Some(dir) => RunOutcome::Created(dir),
        None => RunOutcome::Unchanged,
    })
}

/// Waits for each interval boundary and runs a check; failed runs are retried after
/// [`RETRY_DELAY`]. Only returns when the process is interrupted.
pub fn run_continuous<F: Fetcher>(
    builder: &mut SnapshotBuilder<F>,
    pages: &[String],
    interval_hours: u32,
    clock: &dyn Clock,
) {
    info!(interval_hours, "starting continuous archiving");
    info!("snapshots are only created when content changes");
    loop {
        let now = clock.now();
        let next = next_run_after(now, interval_hours);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(
            next_run = %next.format("%Y-%m-%d %I:%M %p"),
            wait_hours = %format!("{:.2}", wait.as_secs_f64() / 3600.0),
            "waiting for next interval"
        );
        thread::sleep(wait);

        match run_once(builder, pages) {
            Ok(RunOutcome::Created(dir)) => info!(dir = %dir.display(), "snapshot created"),
            Ok(RunOutcome::Unchanged) => info!("next check scheduled for next interval"),
            Err(err) => {
                error!(error = %err, "scheduled run failed; retrying in 5 minutes");
                thread::sleep(RETRY_DELAY);
            }
        }
    }
}
