#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use tracing::warn;

pub const ENV_ECHO_TIMEOUT_MS: &str = "CAMPUS_ECHO_TIMEOUT_MS";
pub const ENV_ECHO_SWEEP_INTERVAL_MS: &str = "CAMPUS_ECHO_SWEEP_INTERVAL_MS";
pub const ENV_RESYNC_ON_RECONNECT: &str = "CAMPUS_RESYNC_ON_RECONNECT";
pub const ENV_FEED_MODE: &str = "CAMPUS_FEED_MODE";

const ECHO_TIMEOUT_MS_DEFAULT: u64 = 3_000;
const ECHO_TIMEOUT_MS_MIN: u64 = 100;
const ECHO_TIMEOUT_MS_MAX: u64 = 60_000;
const ECHO_SWEEP_MS_DEFAULT: u64 = 250;
const ECHO_SWEEP_MS_MIN: u64 = 10;
const ECHO_SWEEP_MS_MAX: u64 = 10_000;

/// What a live list does with each change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Reconcile the event into the local list.
    Reconcile,
    /// Treat the event as a signal and re-fetch the table. For tables whose
    /// rows are only meaningful as a whole, such as a timetable grid.
    RefetchOnChange,
}

impl FeedMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "reconcile" => Some(FeedMode::Reconcile),
            "refetch" | "refetch_on_change" => Some(FeedMode::RefetchOnChange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveListConfig {
    /// How long a remotely-confirmed mutation waits for its own echo before
    /// it is treated as settled.
    pub echo_timeout: Duration,
    pub echo_sweep_interval: Duration,
    /// Re-fetch the whole table when the feed comes back.
    pub resync_on_reconnect: bool,
    pub feed_mode: FeedMode,
}

impl LiveListConfig {
    pub fn mvp_v1() -> Self {
        Self {
            echo_timeout: Duration::from_millis(ECHO_TIMEOUT_MS_DEFAULT),
            echo_sweep_interval: Duration::from_millis(ECHO_SWEEP_MS_DEFAULT),
            resync_on_reconnect: true,
            feed_mode: FeedMode::Reconcile,
        }
    }

    pub fn refetch_on_change() -> Self {
        Self {
            feed_mode: FeedMode::RefetchOnChange,
            ..Self::mvp_v1()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Unparseable or out-of-range values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::mvp_v1();
        let echo_timeout_ms = bounded_ms(
            ENV_ECHO_TIMEOUT_MS,
            lookup(ENV_ECHO_TIMEOUT_MS),
            ECHO_TIMEOUT_MS_DEFAULT,
            ECHO_TIMEOUT_MS_MIN,
            ECHO_TIMEOUT_MS_MAX,
        );
        let sweep_ms = bounded_ms(
            ENV_ECHO_SWEEP_INTERVAL_MS,
            lookup(ENV_ECHO_SWEEP_INTERVAL_MS),
            ECHO_SWEEP_MS_DEFAULT,
            ECHO_SWEEP_MS_MIN,
            ECHO_SWEEP_MS_MAX,
        );
        let resync_on_reconnect = match lookup(ENV_RESYNC_ON_RECONNECT)
            .as_deref()
            .map(str::trim)
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            None | Some("") => defaults.resync_on_reconnect,
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            Some(other) => {
                warn!(
                    key = ENV_RESYNC_ON_RECONNECT,
                    value = other,
                    "unrecognised flag, using default"
                );
                defaults.resync_on_reconnect
            }
        };
        let feed_mode = match lookup(ENV_FEED_MODE) {
            None => defaults.feed_mode,
            Some(raw) => FeedMode::parse(&raw).unwrap_or_else(|| {
                warn!(key = ENV_FEED_MODE, value = %raw, "unrecognised mode, using default");
                defaults.feed_mode
            }),
        };
        Self {
            echo_timeout: Duration::from_millis(echo_timeout_ms),
            echo_sweep_interval: Duration::from_millis(sweep_ms),
            resync_on_reconnect,
            feed_mode,
        }
    }

    pub fn echo_timeout_ns(&self) -> u64 {
        u64::try_from(self.echo_timeout.as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for LiveListConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

fn bounded_ms(key: &'static str, raw: Option<String>, default: u64, min: u64, max: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if (min..=max).contains(&ms) => ms,
        Ok(ms) => {
            warn!(key, value = ms, min, max, "out of range, using default");
            default
        }
        Err(_) => {
            warn!(key, value = %raw, "not a number, using default");
            default
        }
    }
}
