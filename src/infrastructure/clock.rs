use crate::domain::ports::Clock;
use chrono::{DateTime, Utc};

/// `Clock` backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `Clock` test double, exposed outside `#[cfg(test)]` so integration
/// test binaries under `tests/` can drive it too (mirrors how
/// `infrastructure::drivers::fake` stays always-compiled).
pub mod fake {
    use super::Clock;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    /// `Clock` whose reading is set explicitly, for deterministic tests of
    /// reservation preemption and override expiry.
    pub struct FakeClock(Mutex<DateTime<Utc>>);

    impl FakeClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        pub fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }

        pub fn advance(&self, duration: chrono::Duration) {
            let mut guard = self.0.lock().unwrap();
            *guard += duration;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }
}
