pub mod board;
pub mod calendar_sync;
pub mod gate;
pub mod scheduler;
pub mod subs;

pub use board::BoardReconciler;
pub use calendar_sync::{CalendarSync, SyncStats};
pub use gate::ResyncGate;
pub use scheduler::EscalationScheduler;
pub use subs::{ClaimOutcome, SubService};
