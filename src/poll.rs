use std::time::Duration;

use crate::platform::Platform;

/// Bounded exponential backoff for [`poll_until`].
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub timeout: Duration,
}

impl Backoff {
    pub const fn new(initial: Duration, max: Duration, timeout: Duration) -> Self {
        Backoff {
            initial,
            max,
            timeout,
        }
    }
}

/// Waits for a device node to show up after partitioning.
pub const DEVICE_NODE: Backoff = Backoff::new(
    Duration::from_millis(100),
    Duration::from_secs(1),
    Duration::from_secs(10),
);

/// Checks `ready` until it holds or `backoff.timeout` worth of sleeping has
/// passed. Returns whether it became ready.
///
/// Time is accounted as the sum of requested sleeps, so a platform that does
/// not really sleep still terminates.
pub fn poll_until(
    platform: &dyn Platform,
    backoff: Backoff,
    mut ready: impl FnMut() -> bool,
) -> bool {
    let mut waited = Duration::ZERO;
    let mut delay = backoff.initial;

    loop {
        if ready() {
            return true;
        }
        if waited >= backoff.timeout {
            return false;
        }
        let step = delay.min(backoff.timeout - waited);
        platform.sleep(step);
        waited += step;
        delay = (delay * 2).min(backoff.max);
    }
}
