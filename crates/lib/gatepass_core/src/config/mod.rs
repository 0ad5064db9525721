//! Engine configuration.

use chrono::{Duration, FixedOffset, Offset, Utc};

/// Default QR token lifetime: 5 minutes.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 5 * 60;

/// Default notification channel capacity.
pub const DEFAULT_NOTIFY_CAPACITY: usize = 256;

/// Default campus offset from UTC, in minutes (UTC+05:30).
pub const DEFAULT_CAMPUS_UTC_OFFSET_MINUTES: i32 = 330;

/// Tunables for the gate-pass engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Lifetime of an issued QR token.
    pub token_ttl: Duration,
    /// Buffered notifications per receiver before it starts lagging.
    pub notification_capacity: usize,
    /// Offset used to interpret planned dates and times on applications.
    pub campus_offset: FixedOffset,
}

impl EngineConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                      | Default |
    /// |-------------------------------|---------|
    /// | `GATEPASS_TOKEN_TTL_SECS`     | `300`   |
    /// | `GATEPASS_NOTIFY_CAPACITY`    | `256`   |
    /// | `GATEPASS_UTC_OFFSET_MINUTES` | `330`   |
    pub fn from_env() -> Self {
        let ttl_secs = env_parse("GATEPASS_TOKEN_TTL_SECS")
            .filter(|s: &i64| *s > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let capacity = env_parse("GATEPASS_NOTIFY_CAPACITY")
            .filter(|c: &usize| *c > 0)
            .unwrap_or(DEFAULT_NOTIFY_CAPACITY);
        let offset_minutes =
            env_parse("GATEPASS_UTC_OFFSET_MINUTES").unwrap_or(DEFAULT_CAMPUS_UTC_OFFSET_MINUTES);
        Self {
            token_ttl: Duration::seconds(ttl_secs),
            notification_capacity: capacity,
            campus_offset: offset_from_minutes(offset_minutes),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
            notification_capacity: DEFAULT_NOTIFY_CAPACITY,
            campus_offset: offset_from_minutes(DEFAULT_CAMPUS_UTC_OFFSET_MINUTES),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn offset_from_minutes(minutes: i32) -> FixedOffset {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or(Utc.fix())
}
