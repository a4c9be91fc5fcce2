use chrono::{DateTime, Utc};

/// Time source seam. The scheduler, reservation manager, and override
/// manager all read "now" through this instead of `Utc::now()` directly
/// so that tests can drive time deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
