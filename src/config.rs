//! Tunable constants, overridable via environment variables.
//!
//! Every default here is the exact value the spec names; operators can
//! override one in an incident without a redeploy, but an unconfigured
//! process behaves exactly as documented.

use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Hard per-request deadline for a single upstream poll (§4.1).
pub fn upstream_timeout() -> Duration {
    Duration::from_millis(env_u64("RELAY_UPSTREAM_TIMEOUT_MS", 10_000))
}

/// Clamp bounds applied to the upstream's suggested delay (§4.5 tick step 4).
pub fn poll_delay_min() -> Duration {
    Duration::from_millis(env_u64("RELAY_POLL_DELAY_MIN_MS", 1_000))
}

pub fn poll_delay_max() -> Duration {
    Duration::from_millis(env_u64("RELAY_POLL_DELAY_MAX_MS", 20_000))
}

/// Delay used when the upstream offers no suggestion (§4.5 tick step 4).
pub fn poll_delay_default() -> Duration {
    Duration::from_millis(env_u64("RELAY_POLL_DELAY_DEFAULT_MS", 3_000))
}

/// Delay used after a transient transport/HTTP/throttle failure (§4.5 tick step 5).
pub fn transient_error_delay() -> Duration {
    Duration::from_millis(env_u64("RELAY_TRANSIENT_ERROR_DELAY_MS", 5_000))
}

/// Requeue delay when not yet READY or the continuation is empty (§4.5 tick step 1).
pub fn not_ready_delay() -> Duration {
    Duration::from_millis(env_u64("RELAY_NOT_READY_DELAY_MS", 2_000))
}

/// Deadman threshold: poll silence beyond which auto-heal fires (§4.5.1).
pub fn deadman_threshold() -> Duration {
    Duration::from_millis(env_u64("RELAY_DEADMAN_THRESHOLD_MS", 45_000))
}

/// Initial and capped heal backoff (§3 Session.healBackoff, §4.5.1).
pub fn heal_backoff_start() -> Duration {
    Duration::from_millis(env_u64("RELAY_HEAL_BACKOFF_START_MS", 5_000))
}

pub fn heal_backoff_cap() -> Duration {
    Duration::from_millis(env_u64("RELAY_HEAL_BACKOFF_CAP_MS", 60_000))
}

/// Delay before a freshly attached subscriber gets its first tick (§9 open question b).
pub fn initial_attach_delay() -> Duration {
    Duration::from_millis(env_u64("RELAY_INITIAL_ATTACH_DELAY_MS", 1_000))
}

/// Keepalive ping interval while any subscriber is attached (§6).
pub fn keepalive_interval() -> Duration {
    Duration::from_millis(env_u64("RELAY_KEEPALIVE_INTERVAL_MS", 30_000))
}

/// Dedup window capacity (§4.2).
pub fn dedup_capacity() -> usize {
    env_u64("RELAY_DEDUP_CAPACITY", 50) as usize
}

/// Grace window subtracted from boot epoch by the time barrier (§4.3).
pub fn time_barrier_grace() -> Duration {
    Duration::from_millis(env_u64("RELAY_TIME_BARRIER_GRACE_MS", 5_000))
}

/// Per-sink outbox cap (§4.4).
pub fn outbox_cap() -> usize {
    env_u64("RELAY_OUTBOX_CAP", 500) as usize
}

/// Per-sink inter-payload drain pacing (§4.4).
pub fn drain_pacing() -> Duration {
    Duration::from_millis(env_u64("RELAY_DRAIN_PACING_MS", 100))
}

/// Deadline for a single session's `/readyz` snapshot round-trip; a session
/// stuck past this (mailbox wedged, actor gone) counts as non-responsive
/// rather than blocking the whole readiness check.
pub fn snapshot_timeout() -> Duration {
    Duration::from_millis(env_u64("RELAY_SNAPSHOT_TIMEOUT_MS", 500))
}

/// Fraction of responsive sessions past the deadman threshold without a
/// successful poll beyond which `/readyz` reports degraded (ambient
/// operational signal, SPEC_FULL.md "Health").
pub fn readiness_degraded_stall_fraction() -> f64 {
    std::env::var("RELAY_READINESS_DEGRADED_STALL_FRACTION")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        assert_eq!(dedup_capacity(), 50);
        assert_eq!(outbox_cap(), 500);
        assert_eq!(heal_backoff_start(), Duration::from_millis(5_000));
        assert_eq!(heal_backoff_cap(), Duration::from_millis(60_000));
        assert_eq!(deadman_threshold(), Duration::from_millis(45_000));
    }
}
