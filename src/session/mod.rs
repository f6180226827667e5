pub mod state;
pub mod tracker;

pub use state::{
    round_ms_to_secs, ActiveSession, CompletedObservation, EndReason, TrackerStatus,
    MIN_OBSERVATION_SECS,
};
pub use tracker::{PendingVisibilityLoss, SessionTracker, VisibilityOutcome};
