use std::sync::OnceLock;
use std::time::Instant;

/// Timestamp in nanoseconds. The reference point depends on the
/// [`TimestampMode`] of the port that produced the message.
pub type Timestamp = i64;

/// How timestamps are derived for incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// Every message carries timestamp 0.
    NoTimestamp,
    /// Delta since the previous message of the session; 0 for the first.
    Relative,
    /// Monotonic nanoseconds since the port was opened.
    #[default]
    Absolute,
    /// Monotonic nanoseconds on the OS clock (since boot or an equivalent
    /// stable epoch), when the backend can provide it.
    SystemMonotonic,
    /// Sample index, for backends that deliver inside an audio cycle.
    /// Falls back to `Absolute` elsewhere.
    AudioFrame,
}

/// What the backend's clock can do; drives the mode fallbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockInfo {
    pub has_absolute_timestamps: bool,
    pub absolute_is_monotonic: bool,
    pub has_samples: bool,
}

/// Nanoseconds on a process-wide monotonic clock.
///
/// Used as the fallback when a backend has no monotonic clock of its own,
/// and by the software backends as their native clock.
pub(crate) fn monotonic_now() -> Timestamp {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as i64
}

/// Derives per-message timestamps for one input session.
///
/// Invoked exactly once per emitted message, on whatever thread the backend
/// dispatches on.
pub(crate) struct TimestampEngine {
    mode: TimestampMode,
    clock: ClockInfo,
    epoch: Timestamp,
    last: Option<Timestamp>,
}

impl TimestampEngine {
    pub fn new(mode: TimestampMode, clock: ClockInfo) -> TimestampEngine {
        TimestampEngine {
            mode,
            clock,
            epoch: 0,
            last: None,
        }
    }

    /// Marks the port-open instant; establishes the `Absolute` epoch and
    /// resets the `Relative` history.
    pub fn begin_session(&mut self, now_ns: Timestamp) {
        self.epoch = now_ns;
        self.last = None;
    }

    /// Computes the outgoing timestamp for a message whose backend clock
    /// reads `raw_ns`, with `sample` set when the backend counts frames.
    pub fn stamp(&mut self, raw_ns: Timestamp, sample: Option<i64>) -> Timestamp {
        match self.mode {
            TimestampMode::NoTimestamp => 0,
            TimestampMode::Relative => {
                let delta = match self.last {
                    Some(last) => raw_ns - last,
                    None => 0,
                };
                self.last = Some(raw_ns);
                delta
            }
            TimestampMode::Absolute => raw_ns - self.epoch,
            TimestampMode::SystemMonotonic => {
                if self.clock.absolute_is_monotonic {
                    raw_ns
                } else {
                    monotonic_now()
                }
            }
            TimestampMode::AudioFrame => match sample {
                Some(frame) if self.clock.has_samples => frame,
                _ => raw_ns - self.epoch,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monotonic_clock() -> ClockInfo {
        ClockInfo {
            has_absolute_timestamps: true,
            absolute_is_monotonic: true,
            has_samples: false,
        }
    }

    #[test]
    fn no_timestamp_is_zero() {
        let mut engine = TimestampEngine::new(TimestampMode::NoTimestamp, monotonic_clock());
        engine.begin_session(1_000);
        assert_eq!(engine.stamp(5_000, None), 0);
        assert_eq!(engine.stamp(9_000, None), 0);
    }

    #[test]
    fn relative_starts_at_zero() {
        let mut engine = TimestampEngine::new(TimestampMode::Relative, monotonic_clock());
        engine.begin_session(1_000);
        assert_eq!(engine.stamp(5_000, None), 0);
        assert_eq!(engine.stamp(9_000, None), 4_000);
        assert_eq!(engine.stamp(9_000, None), 0);
    }

    #[test]
    fn absolute_is_anchored_at_port_open() {
        let mut engine = TimestampEngine::new(TimestampMode::Absolute, monotonic_clock());
        engine.begin_session(1_000);
        assert_eq!(engine.stamp(5_000, None), 4_000);
        assert_eq!(engine.stamp(6_500, None), 5_500);
    }

    #[test]
    fn system_monotonic_passes_through_monotonic_clocks() {
        let mut engine = TimestampEngine::new(TimestampMode::SystemMonotonic, monotonic_clock());
        engine.begin_session(1_000);
        assert_eq!(engine.stamp(5_000, None), 5_000);
    }

    #[test]
    fn system_monotonic_falls_back_when_clock_is_not_monotonic() {
        let clock = ClockInfo {
            has_absolute_timestamps: true,
            absolute_is_monotonic: false,
            has_samples: false,
        };
        let mut engine = TimestampEngine::new(TimestampMode::SystemMonotonic, clock);
        engine.begin_session(0);
        let a = engine.stamp(42, None);
        let b = engine.stamp(41, None);
        assert!(b >= a);
    }

    #[test]
    fn audio_frame_uses_samples_or_falls_back() {
        let clock = ClockInfo {
            has_absolute_timestamps: true,
            absolute_is_monotonic: true,
            has_samples: true,
        };
        let mut engine = TimestampEngine::new(TimestampMode::AudioFrame, clock);
        engine.begin_session(1_000);
        assert_eq!(engine.stamp(5_000, Some(256)), 256);

        let mut engine = TimestampEngine::new(TimestampMode::AudioFrame, monotonic_clock());
        engine.begin_session(1_000);
        assert_eq!(engine.stamp(5_000, Some(256)), 4_000);
    }
}
