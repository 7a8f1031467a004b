use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the millisecond precision documents are persisted with.
pub(crate) fn timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
