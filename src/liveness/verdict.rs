//! Session verdicts.

use serde::Serialize;
use std::fmt;

/// Outcome of a detection session.
///
/// Transitions only from `Pending` to one of the terminal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pending,
    Live,
    NotLive,
    TimedOut,
    Cancelled,
}

impl Verdict {
    /// Returns true once the verdict can no longer change.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Verdict::Pending)
    }

    /// Numeric code used by the metrics exporter.
    pub fn code(self) -> i64 {
        match self {
            Verdict::Pending => 0,
            Verdict::Live => 1,
            Verdict::NotLive => 2,
            Verdict::TimedOut => 3,
            Verdict::Cancelled => 4,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Pending => "pending",
            Verdict::Live => "live",
            Verdict::NotLive => "not-live",
            Verdict::TimedOut => "timed-out",
            Verdict::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
