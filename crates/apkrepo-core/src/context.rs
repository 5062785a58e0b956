//! Per-call operation context.
//!
//! Groups what every engine entry point needs from its caller (where to
//! report and how long an external program may run) so it is passed
//! explicitly rather than captured globally.

use std::fmt;
use std::time::Duration;

use crate::reporter::Reporter;

/// Timeout applied to each external program run when the caller has no
/// better value.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Borrowed state for one engine call.
#[derive(Clone, Copy)]
pub struct OpContext<'a> {
    pub reporter: &'a dyn Reporter,
    /// Upper bound for every single external program invocation.
    pub timeout: Duration,
}

impl fmt::Debug for OpContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<'a> OpContext<'a> {
    pub fn new(reporter: &'a dyn Reporter, timeout: Duration) -> Self {
        Self { reporter, timeout }
    }
}
