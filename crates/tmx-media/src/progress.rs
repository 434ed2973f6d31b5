//! FFmpeg stderr progress parsing.
//!
//! FFmpeg's stderr is informal: a `Duration:` header line gives the total
//! runtime, then `-progress pipe:2` key/value lines (or classic `time=`
//! stats tokens) report the output position. The tracker parses both
//! defensively, clamps to [0, 100] and never lets the reported value
//! regress.

use std::time::{Duration, Instant};

/// Default minimum interval between progress callbacks.
pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(500);

/// Incremental progress state for one ffmpeg run.
#[derive(Debug)]
pub struct ProgressTracker {
    /// Total input duration in milliseconds, from the first `Duration:` line.
    duration_ms: Option<i64>,
    /// Latest output position in milliseconds.
    out_time_ms: i64,
    /// Highest percentage computed so far.
    percent: f64,
    /// Last emitted percentage (for whole-percent crossing detection).
    last_emitted: f64,
    last_emit_at: Option<Instant>,
    interval: Duration,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_EMIT_INTERVAL)
    }
}

impl ProgressTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            duration_ms: None,
            out_time_ms: 0,
            percent: 0.0,
            last_emitted: 0.0,
            last_emit_at: None,
            interval,
        }
    }

    /// Seed the denominator when the caller already probed the input.
    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        if secs > 0.0 {
            self.duration_ms = Some((secs * 1000.0) as i64);
        }
        self
    }

    /// Feed one stderr line; returns a percentage when an update is due.
    ///
    /// An update is due when the emit interval elapsed or the value crossed
    /// a whole-percent boundary since the last emission.
    pub fn observe(&mut self, line: &str, now: Instant) -> Option<f64> {
        self.ingest(line);

        let due_by_time = self
            .last_emit_at
            .map_or(true, |at| now.duration_since(at) >= self.interval);
        let due_by_step = self.percent.floor() > self.last_emitted.floor();

        if self.percent > self.last_emitted && (due_by_time || due_by_step) {
            self.last_emitted = self.percent;
            self.last_emit_at = Some(now);
            Some(self.percent)
        } else {
            None
        }
    }

    /// Current clamped percentage.
    pub fn percent(&self) -> f64 {
        self.percent
    }

    fn ingest(&mut self, line: &str) {
        let line = line.trim();

        // Denominator: the first "Duration: HH:MM:SS.cc" header wins.
        if self.duration_ms.is_none() {
            if let Some(rest) = line.strip_prefix("Duration:") {
                let token = rest.trim_start().split([',', ' ']).next().unwrap_or("");
                if let Some(secs) = parse_hms(token) {
                    if secs > 0.0 {
                        self.duration_ms = Some((secs * 1000.0) as i64);
                    }
                }
            }
        }

        // Numerator: -progress key/value pairs or classic time= tokens.
        if let Some((key, value)) = line.split_once('=') {
            match key {
                "out_time_ms" | "out_time_us" => {
                    // Despite the name, ffmpeg reports out_time_ms in
                    // microseconds; both keys carry the same value.
                    if let Ok(us) = value.trim().parse::<i64>() {
                        self.out_time_ms = self.out_time_ms.max(us / 1000);
                    }
                }
                "out_time" => {
                    if let Some(secs) = parse_hms(value.trim()) {
                        self.out_time_ms = self.out_time_ms.max((secs * 1000.0) as i64);
                    }
                }
                _ => {}
            }
        }
        if let Some(idx) = line.find("time=") {
            let token = line[idx + 5..].split_whitespace().next().unwrap_or("");
            if let Some(secs) = parse_hms(token) {
                self.out_time_ms = self.out_time_ms.max((secs * 1000.0) as i64);
            }
        }

        if let Some(total) = self.duration_ms {
            if total > 0 {
                let pct = (self.out_time_ms as f64 / total as f64) * 100.0;
                self.percent = self.percent.max(pct.clamp(0.0, 100.0));
            }
        }
    }
}

/// Parse an `HH:MM:SS.cc` timestamp into seconds.
fn parse_hms(s: &str) -> Option<f64> {
    let mut parts = s.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
