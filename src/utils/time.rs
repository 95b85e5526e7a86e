use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Milliseconds since the unix epoch
pub(crate) fn now_millis() -> u64 {
    system_time_millis(SystemTime::now())
}

/// Milliseconds since the unix epoch; times before the epoch clamp to 0
pub(crate) fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
