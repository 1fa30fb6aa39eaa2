//! Shared cron tick and on-demand operations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;

use crate::bus::BusManager;
use crate::directory::{PollSpec, RegisterDirectory};
use crate::error::GatewayError;
use crate::protocol::ReportSink;

/// Log a failed operation at a level matching its cause.
///
/// Bus failures are expected on flaky links and log as warnings.
pub(crate) fn log_failure(error: &GatewayError, context: &str) {
    match error {
        GatewayError::Transport(_) => tracing::warn!("{}: {}", context, error),
        _ => tracing::error!("{}: {}", context, error),
    }
}

/// Drives polls and writes, and forwards decoded values to the report sink.
pub struct Scheduler {
    bus: Arc<BusManager>,
    directory: Arc<RegisterDirectory>,
    reports: Arc<dyn ReportSink>,
}

impl Scheduler {
    pub fn new(
        bus: Arc<BusManager>,
        directory: Arc<RegisterDirectory>,
        reports: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            bus,
            directory,
            reports,
        }
    }

    pub fn directory(&self) -> &RegisterDirectory {
        &self.directory
    }

    /// Poll one register group and report its values in id order.
    ///
    /// Returns how many values were reported. Ids whose bytes fail to decode
    /// are logged and skipped; the rest of the group is still reported.
    pub async fn poll(&self, spec: &PollSpec) -> Result<usize, GatewayError> {
        let Some(readings) = self.bus.poll(spec).await? else {
            return Ok(0);
        };

        let mut reported = 0;
        for (id, value) in readings {
            match value {
                Ok(value) => {
                    self.reports.report(&id, &value).await;
                    reported += 1;
                }
                Err(e) => {
                    tracing::error!(network = %spec.network, id = %id, "Failed to decode: {}", e)
                }
            }
        }

        Ok(reported)
    }

    /// Write one value and report it back.
    ///
    /// A bus failure triggers exactly one re-poll of the same register so the
    /// peer learns the value actually held by the device.
    pub async fn write(&self, spec: &PollSpec, value: &str) -> Result<(), GatewayError> {
        match self.bus.write(spec, value).await {
            Ok(Some(written)) => {
                for id in spec.ids() {
                    self.reports.report(id, &written).await;
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(GatewayError::Transport(e)) => {
                tracing::error!(network = %spec.network, ids = ?spec.ids(), "Write failed: {}", e);

                if let Err(poll_error) = self.poll(spec).await {
                    log_failure(&poll_error, "Re-poll after failed write");
                }

                Err(GatewayError::Transport(e))
            }
            Err(e) => Err(e),
        }
    }

    /// On-demand read of a symbolic id.
    pub async fn read_id(&self, id: &str) -> Result<usize, GatewayError> {
        let spec = self.resolve(id)?;
        self.poll(&spec).await
    }

    /// On-demand write to a symbolic id.
    pub async fn write_id(&self, id: &str, value: &str) -> Result<(), GatewayError> {
        let spec = self.resolve(id)?;
        self.write(&spec, value).await
    }

    fn resolve(&self, id: &str) -> Result<PollSpec, GatewayError> {
        self.directory
            .resolve(id)
            .ok_or_else(|| GatewayError::UnknownId(id.to_string()))
    }

    /// Start one independent poll per registered group.
    pub fn tick(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.directory
            .entries()
            .iter()
            .map(|spec| {
                let scheduler = Arc::clone(self);
                let spec = spec.clone();

                tokio::spawn(async move {
                    if let Err(e) = scheduler.poll(&spec).await {
                        log_failure(&e, &format!("Poll of {:?} on '{}'", spec.ids(), spec.network));
                    }
                })
            })
            .collect()
    }

    /// Fire [`tick`](Self::tick) at every occurrence of `schedule`.
    pub async fn run(self: Arc<Self>, schedule: Schedule) {
        tracing::info!(
            registers = self.directory.len(),
            "Poll scheduler started"
        );

        let mut last = Utc::now();

        loop {
            let from = std::cmp::max(last, Utc::now());
            let Some(next) = schedule.after(&from).next() else {
                tracing::warn!("Poll schedule has no further occurrences");
                return;
            };

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            last = next;
            tracing::debug!(at = %next, "Poll tick");
            self.tick();
        }
    }
}
