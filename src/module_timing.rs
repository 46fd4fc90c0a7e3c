use embassy_time::Duration;

/// Low time of the power key to switch the module on
pub fn pwr_on_time() -> Duration {
    Duration::from_millis(100)
}

/// Time to wait for module to boot after releasing the power key
pub fn boot_time() -> Duration {
    Duration::from_secs(2)
}

/// Quiet period before the first probe, also used between init attempts
pub fn settle_time() -> Duration {
    Duration::from_secs(1)
}

/// Response window of a single `AT` liveness probe
pub fn probe_timeout() -> Duration {
    Duration::from_millis(1000)
}

/// Pause between two failed liveness probes
pub fn probe_retry_delay() -> Duration {
    Duration::from_millis(1000)
}

/// Pause between two SIM status queries
pub fn pin_retry_delay() -> Duration {
    Duration::from_millis(500)
}

/// Sleep between two polls of the serial line inside a synchronous exchange
pub fn poll_interval() -> Duration {
    Duration::from_millis(1)
}
