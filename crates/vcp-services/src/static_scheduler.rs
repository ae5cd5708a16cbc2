//! Static placeholder refresh scheduling.
//!
//! Every enabled static plugin is run once at startup. Plugins declaring a
//! `refreshIntervalCron` then get their own tokio task that sleeps until
//! the next fire time and refreshes the placeholder cache. Jobs do not
//! share state, so an unparseable schedule or a failing run only affects
//! its own plugin.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vcp_plugin::{PluginKind, PluginRegistry};

use crate::error::{Result, ServiceError};

/// Rewrite a cron expression into the seconds-first form.
///
/// Classic five-field expressions (minute first, Sunday = 0 or 7) get a
/// leading `0` seconds field and their numeric weekdays shifted to the
/// Sunday = 1 numbering. Six and seven field expressions pass through.
pub fn normalize_cron(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        shift_weekdays(fields[4])
    )
}

fn shift_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(shift_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

/// One comma-separated item: `*`, `n`, `a-b`, any of those with `/step`.
fn shift_weekday_item(item: &str) -> String {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    let with_step = |base: String| match step {
        Some(step) => format!("{base}/{step}"),
        None => base,
    };

    if let Some((from, to)) = base.split_once('-')
        && let (Ok(from), Ok(to)) = (from.parse::<u8>(), to.parse::<u8>())
    {
        let (from, to) = (shift_day(from), shift_day(to));
        // `x-7` ends on Sunday, which now sorts first.
        if to < from {
            return format!("{},1", with_step(format!("{from}-7")));
        }
        return with_step(format!("{from}-{to}"));
    }
    match base.parse::<u8>() {
        Ok(day) => with_step(shift_day(day).to_string()),
        Err(_) => with_step(base.to_owned()),
    }
}

fn shift_day(day: u8) -> u8 {
    (day % 7) + 1
}

/// Parse a (possibly five-field) cron expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let normalized = normalize_cron(expr);
    Schedule::from_str(&normalized).map_err(|e| ServiceError::InvalidCronExpression {
        expr: expr.to_owned(),
        reason: e.to_string(),
    })
}

/// Next fire time strictly after `after`, if the schedule has one.
pub fn next_fire<Z: TimeZone>(expr: &str, after: &DateTime<Z>) -> Result<Option<DateTime<Z>>> {
    Ok(parse_schedule(expr)?.after(after).next())
}

/// A static plugin with a recurring refresh.
#[derive(Debug, Clone)]
pub struct RefreshJob {
    pub plugin: String,
    pub schedule: Schedule,
}

/// Keeps the static placeholder cache fresh.
pub struct StaticScheduler {
    registry: Arc<PluginRegistry>,
}

impl StaticScheduler {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Recurring jobs for every enabled static plugin with a valid
    /// schedule. Invalid schedules are logged and left out.
    pub fn jobs(&self) -> Vec<RefreshJob> {
        let mut jobs = Vec::new();
        for manifest in self.registry.enabled_of_kind(PluginKind::Static) {
            let Some(expr) = manifest
                .refresh_interval_cron
                .as_deref()
                .filter(|e| !e.trim().is_empty())
            else {
                continue;
            };
            match parse_schedule(expr) {
                Ok(schedule) => jobs.push(RefreshJob {
                    plugin: manifest.name.clone(),
                    schedule,
                }),
                Err(e) => warn!(
                    plugin = %manifest.name,
                    error = %e,
                    "invalid refresh schedule, plugin will only run at startup"
                ),
            }
        }
        jobs
    }

    /// Run every enabled static plugin once, concurrently. Returns how
    /// many succeeded.
    pub async fn refresh_all(&self) -> usize {
        let mut set = JoinSet::new();
        for manifest in self.registry.enabled_of_kind(PluginKind::Static) {
            let registry = self.registry.clone();
            let name = manifest.name.clone();
            set.spawn(async move { registry.refresh_static(&name).await.is_ok() });
        }

        let total = set.len();
        let mut succeeded = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "static refresh task panicked"),
            }
        }
        info!(total, succeeded, "initial static placeholder refresh done");
        succeeded
    }

    /// Refresh everything once, then spawn one task per recurring job.
    ///
    /// The tasks run until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.refresh_all().await;

        let handles: Vec<_> = self
            .jobs()
            .into_iter()
            .map(|job| tokio::spawn(run_job(self.registry.clone(), job, cancel.clone())))
            .collect();
        info!(jobs = handles.len(), "static scheduler started");
        handles
    }
}

async fn run_job(registry: Arc<PluginRegistry>, job: RefreshJob, cancel: CancellationToken) {
    loop {
        let Some(next) = job.schedule.upcoming(Local).next() else {
            debug!(plugin = %job.plugin, "schedule has no further occurrences");
            return;
        };
        let wait = (next - Local::now()).to_std().unwrap_or_default();
        debug!(plugin = %job.plugin, next = %next, "next static refresh scheduled");

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(plugin = %job.plugin, "static refresh job stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {
                // Outcome is logged and cached by the registry.
                let _ = registry.refresh_static(&job.plugin).await;
            }
        }
    }
}
