use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::services::subs::SubService;

/// Drives the escalation checks: one pass at startup, then one per interval.
/// Double or delayed firing is harmless because the per-request counter in
/// the store is the ratchet, not this loop.
pub struct EscalationScheduler {
    subs: Arc<SubService>,
    interval: Duration,
}

impl EscalationScheduler {
    pub fn new(subs: Arc<SubService>, interval_secs: u64) -> Self {
        Self {
            subs,
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub async fn start(self) {
        info!(
            "Starting escalation scheduler (interval: {:?})",
            self.interval
        );

        loop {
            if let Err(e) = self.subs.check_escalations(Utc::now()).await {
                warn!("Escalation check failed: {:?}", e);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
