// Time utility functions

use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::time::Duration;

/// Seconds left until `instant`. Zero when it is already in the past.
pub fn seconds_until(instant: &DateTime<Utc>) -> Seconds {
    Seconds((instant.timestamp() - Utc::now().timestamp()).max(0) as u64)
}

/// Converts a Unix timestamp as reported by the remote into a UTC date.
pub fn epoch_to_datetime(epoch: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(epoch).ok()?, 0)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct Seconds(u64);

impl Seconds {
    pub fn new(seconds: u64) -> Self {
        Seconds(seconds)
    }
}

impl Deref for Seconds {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Seconds {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Seconds> for Duration {
    fn from(seconds: Seconds) -> Self {
        Duration::from_secs(seconds.0)
    }
}
