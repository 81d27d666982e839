//! Status reporting with a fixed retry budget.

use std::sync::Arc;
use vigil_core::controller::ControllerTransport;
use vigil_core::settings::ReportPolicy;
use vigil_core::status::StatusSnapshot;

const ACCEPTED: &str = "OK";

/// Posts status snapshots to the controller.
///
/// Delivery is at-least-once but not guaranteed: after the retry budget is
/// spent the report is dropped and `false` is returned. Reporting never
/// fails the caller.
pub struct Telemetry {
    controller: Arc<dyn ControllerTransport>,
    policy: ReportPolicy,
}

impl Telemetry {
    pub fn new(controller: Arc<dyn ControllerTransport>, policy: ReportPolicy) -> Self {
        Self { controller, policy }
    }

    /// Sends `snapshot`: a burst of immediate attempts, then paced attempts.
    pub async fn report(&self, snapshot: &StatusSnapshot) -> bool {
        for _ in 0..self.policy.burst_attempts {
            if self.attempt(snapshot).await {
                return true;
            }
        }

        for _ in 0..self.policy.paced_attempts {
            tokio::time::sleep(self.policy.pace()).await;
            if self.attempt(snapshot).await {
                return true;
            }
        }

        tracing::warn!(
            "[Telemetry] dropped status {:?} after {} attempts",
            snapshot.label,
            self.policy.total_attempts()
        );
        false
    }

    async fn attempt(&self, snapshot: &StatusSnapshot) -> bool {
        match self.controller.post_status(snapshot).await {
            Ok(body) if body.trim() == ACCEPTED => {
                tracing::debug!("[Telemetry] reported {:?}", snapshot.label);
                true
            }
            Ok(body) => {
                tracing::debug!("[Telemetry] controller answered {:?}", body);
                false
            }
            Err(e) => {
                tracing::debug!("[Telemetry] report failed: {}", e);
                false
            }
        }
    }
}
