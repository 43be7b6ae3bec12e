use std::{sync::OnceLock, time::Instant};

static BOOT: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the first call in this process. Feeds `ControlLoop::tick`
/// and the supervisor timers.
pub fn uptime_ms() -> u64 {
    let boot = *BOOT.get_or_init(Instant::now);
    u64::try_from(boot.elapsed().as_millis()).unwrap_or(u64::MAX)
}
