use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Clock
///
/// Defines the abstract contract for reading the current UTC instant. The
/// lifecycle core consults this instead of calling `Utc::now()` directly so
/// tests can substitute a manually-advanced clock and pin expiration math to
/// known instants.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// SystemClock
///
/// The production implementation, backed by the OS wall clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// ClockState
///
/// The concrete type used to share the clock across the application state.
pub type ClockState = Arc<dyn Clock>;
