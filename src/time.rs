//! Steady clock and timestamp helpers.
//!
//! All protocol timestamps derive from a process-wide monotonic anchor, not
//! from the wall clock: the wall clock may jump (NTP, the client's own
//! `syncSystemTime` feature) while replay-protection windows must not. The
//! clock is read through `tokio::time` so tests running under a paused
//! runtime observe the same "now" as the library.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Time elapsed since the process-wide steady clock anchor.
///
/// The anchor is captured on first use; only differences of this value are
/// meaningful.
pub fn steady_time() -> Duration {
    ANCHOR.get_or_init(Instant::now).elapsed()
}

/// Current timestamp in whole `time_unit`s, shifted by `ts_diff_ms` and
/// reduced to the on-wire `u16` range.
///
/// This is the value carried in [`crate::LocalMsg::ts`]; it wraps roughly
/// every `65536 * time_unit`.
pub fn unit_timestamp(ts_diff_ms: i64, time_unit: Duration) -> u16 {
    let ms = steady_time().as_millis() as i64 + ts_diff_ms;
    let unit_ms = (time_unit.as_millis() as i64).max(1);
    ms.div_euclid(unit_ms) as u16
}

/// Sets the system wall clock to `unix_ms` milliseconds, with millisecond
/// precision. Requires the usual platform privileges.
#[cfg(unix)]
pub fn set_system_time(unix_ms: i64) -> Result<()> {
    let tv = libc::timeval {
        tv_sec: (unix_ms / 1000) as libc::time_t,
        tv_usec: ((unix_ms % 1000) * 1000) as libc::suseconds_t,
    };
    // SAFETY: `tv` is a valid timeval and the timezone argument may be null.
    let rc = unsafe { libc::settimeofday(&tv, std::ptr::null()) };
    if rc != 0 {
        return Err(Error::GenericFailure);
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_system_time(_unix_ms: i64) -> Result<()> {
    Err(Error::NotSupported)
}
