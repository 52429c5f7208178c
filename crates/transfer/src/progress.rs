use std::fmt;
use std::time::Duration;

use crate::MIN_ESTIMATE_BYTES;

/// Share of the 0–100 scale covered by byte transfer.
///
/// The caller's baseline sits below it and the last 10 points are headroom.
const PROGRESS_SPAN: f64 = 90.0;

/// Remaining-time estimate for an upload session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    /// Not enough bytes sent yet for a meaningful figure.
    Estimating,
    /// Estimated time left plus the throughput it was derived from.
    Remaining { remaining: Duration, mbps: f64 },
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimate::Estimating => f.write_str("Estimating remaining time"),
            Estimate::Remaining { remaining, mbps } => write!(
                f,
                "About {} remaining ({} Mbps)",
                format_duration(*remaining),
                format_mbps(*mbps)
            ),
        }
    }
}

/// Computes progress and remaining time from cumulative byte counts.
///
/// Pure: every method is a function of its arguments and the fixed
/// session totals, so the caller owns the clock.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEstimator {
    baseline: f64,
    total_bytes: u64,
    min_sample_bytes: u64,
}

impl ProgressEstimator {
    /// Creates an estimator for a session of `total_bytes`, reporting
    /// progress within `[baseline, baseline + 90]`.
    pub fn new(baseline: f64, total_bytes: u64) -> Self {
        Self {
            baseline,
            total_bytes,
            min_sample_bytes: MIN_ESTIMATE_BYTES,
        }
    }

    /// Overrides the minimum number of bytes sent before estimating.
    pub fn with_min_sample_bytes(mut self, bytes: u64) -> Self {
        self.min_sample_bytes = bytes;
        self
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Fraction of the session's bytes sent, in `[0, 1]`. Zero-byte sessions report 0.
    pub fn fraction(&self, bytes_sent: u64) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        bytes_sent.min(self.total_bytes) as f64 / self.total_bytes as f64
    }

    /// Progress percentage: `baseline + 90 × fraction`.
    pub fn percentage(&self, bytes_sent: u64) -> f64 {
        self.baseline + PROGRESS_SPAN * self.fraction(bytes_sent)
    }

    /// Estimates remaining time once at least the minimum sample has been sent.
    pub fn estimate(&self, bytes_sent: u64, elapsed: Duration) -> Estimate {
        if bytes_sent < self.min_sample_bytes || bytes_sent == 0 {
            return Estimate::Estimating;
        }

        let sent = bytes_sent.min(self.total_bytes);
        let remaining_bytes = self.total_bytes - sent;
        let secs =
            (remaining_bytes as f64 * elapsed.as_secs_f64() / bytes_sent as f64).round();

        Estimate::Remaining {
            remaining: Duration::from_secs_f64(secs.max(1.0)),
            mbps: megabits_per_second(bytes_sent, elapsed),
        }
    }

    /// Average throughput over the whole session in megabits per second.
    pub fn average_mbps(&self, elapsed: Duration) -> f64 {
        megabits_per_second(self.total_bytes, elapsed)
    }
}

/// Converts bytes over a duration to megabits per second (`bytes × 8 × 10⁻⁶ / s`).
///
/// Returns 0 for a zero duration.
pub fn megabits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / secs * 8e-6
}

/// Message shown once a session finishes.
pub fn average_speed_message(mbps: f64) -> String {
    format!("Average upload speed: {} Mbps", format_mbps(mbps))
}

/// Formats a duration as friendly English, e.g. `"2 minutes 35 seconds"`.
///
/// Precision drops as the duration grows: above one day only days are
/// shown, above twelve hours only hours.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    let minutes = secs / 60.0;
    let hours = secs / 3600.0;
    let days = secs / 86_400.0;

    if days > 1.0 {
        pluralize(days.round() as u64, "day")
    } else if hours > 12.0 {
        pluralize(hours.round() as u64, "hour")
    } else if hours > 1.0 {
        let whole = hours.floor();
        let rest = ((secs - whole * 3600.0) / 60.0).round() as u64;
        pluralize_with_rest(whole as u64, "hour", rest, "minute")
    } else if minutes > 1.0 {
        let whole = minutes.floor();
        let rest = (secs - whole * 60.0).round() as u64;
        pluralize_with_rest(whole as u64, "minute", rest, "second")
    } else {
        pluralize(secs.round() as u64, "second")
    }
}

fn pluralize(value: u64, unit: &str) -> String {
    if value == 1 {
        format!("{value} {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

fn pluralize_with_rest(value: u64, unit: &str, rest: u64, rest_unit: &str) -> String {
    let head = pluralize(value, unit);
    if rest > 0 {
        format!("{head} {}", pluralize(rest, rest_unit))
    } else {
        head
    }
}

/// Formats a rate with digit grouping and at most two decimals, trailing zeros dropped.
pub fn format_mbps(mbps: f64) -> String {
    let mbps = if mbps.is_finite() { mbps.max(0.0) } else { 0.0 };
    let cents = (mbps * 100.0).round() as u64;
    let whole = group_thousands(cents / 100);
    let frac = cents % 100;

    if frac == 0 {
        whole
    } else if frac % 10 == 0 {
        format!("{whole}.{}", frac / 10)
    } else {
        format!("{whole}.{frac:02}")
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
