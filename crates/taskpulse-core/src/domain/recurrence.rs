//! Recurrence patterns and next-occurrence math.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// How a task repeats after completion.
///
/// Owned by the Task Store; read-only to this crate. The interval for
/// `Custom` is carried inline so a pattern is always self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
    Custom { interval_days: u32 },
}

impl Recurrence {
    /// Compute the due date of the next occurrence from the prior one.
    ///
    /// `Monthly` keeps the day-of-month and clamps to the last day of the
    /// following month when that day does not exist (Jan 31 -> Feb 28/29).
    /// The clamping is chrono's `checked_add_months` behavior; we rely on
    /// it rather than reimplementing calendar math.
    pub fn next_due(&self, due: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Recurrence::Daily => due + Duration::days(1),
            Recurrence::Weekly => due + Duration::days(7),
            // checked_add_months only fails at the end of representable
            // time (year ~262143); saturate rather than propagate.
            Recurrence::Monthly => due
                .checked_add_months(Months::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Recurrence::Custom { interval_days } => due + Duration::days(i64::from(interval_days)),
        }
    }
}
