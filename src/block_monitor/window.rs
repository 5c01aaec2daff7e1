//! Tempo and sub-range arithmetic

use serde::Serialize;

use crate::errors::ConfigError;

/// Registration window inside each tempo: positions `[start, end)`.
///
/// When `start > end` the range wraps across the tempo boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSchedule {
    tempo: u64,
    start: u64,
    end: u64,
}

/// Where a height falls relative to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPosition {
    pub tempo_position: u64,
    pub is_open: bool,
    pub blocks_remaining: u64,
    pub blocks_until_open: u64,
}

impl WindowSchedule {
    pub fn new(tempo: u64, start: u64, end: u64) -> Result<Self, ConfigError> {
        if tempo == 0 {
            return Err(ConfigError::validation("tempo_length must be > 0"));
        }
        if start >= tempo || end > tempo {
            return Err(ConfigError::validation(format!(
                "window_sub_range [{}, {}) must lie within tempo length {}",
                start, end, tempo
            )));
        }
        if start == end {
            return Err(ConfigError::validation("window_sub_range must not be empty"));
        }
        Ok(Self { tempo, start, end })
    }

    pub fn tempo(&self) -> u64 {
        self.tempo
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn position(&self, height: u64) -> u64 {
        height % self.tempo
    }

    pub fn contains(&self, pos: u64) -> bool {
        if self.start < self.end {
            pos >= self.start && pos < self.end
        } else {
            pos >= self.start || pos < self.end
        }
    }

    pub fn evaluate(&self, height: u64) -> WindowPosition {
        let pos = self.position(height);
        let is_open = self.contains(pos);

        let blocks_remaining = if !is_open {
            0
        } else if self.start < self.end || pos < self.end {
            self.end - pos
        } else {
            self.tempo - pos + self.end
        };

        let blocks_until_open = if is_open {
            0
        } else if pos < self.start {
            self.start - pos
        } else {
            self.tempo - pos + self.start
        };

        WindowPosition {
            tempo_position: pos,
            is_open,
            blocks_remaining,
            blocks_until_open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_range() {
        let schedule = WindowSchedule::new(360, 10, 60).unwrap();

        let closed = schedule.evaluate(360 * 100 + 5);
        assert!(!closed.is_open);
        assert_eq!(closed.tempo_position, 5);
        assert_eq!(closed.blocks_until_open, 5);
        assert_eq!(closed.blocks_remaining, 0);

        let open = schedule.evaluate(360 * 100 + 10);
        assert!(open.is_open);
        assert_eq!(open.blocks_remaining, 50);

        let last = schedule.evaluate(360 * 100 + 59);
        assert!(last.is_open);
        assert_eq!(last.blocks_remaining, 1);

        let after = schedule.evaluate(360 * 100 + 60);
        assert!(!after.is_open);
        assert_eq!(after.blocks_until_open, 310);
    }

    #[test]
    fn test_wrapping_range() {
        let schedule = WindowSchedule::new(100, 90, 10).unwrap();

        assert!(schedule.evaluate(95).is_open);
        assert_eq!(schedule.evaluate(95).blocks_remaining, 15);
        assert!(schedule.evaluate(105).is_open);
        assert_eq!(schedule.evaluate(105).blocks_remaining, 5);

        let closed = schedule.evaluate(50);
        assert!(!closed.is_open);
        assert_eq!(closed.blocks_until_open, 40);
    }

    #[test]
    fn test_range_ending_at_tempo() {
        let schedule = WindowSchedule::new(360, 300, 360).unwrap();
        let pos = schedule.evaluate(359);
        assert!(pos.is_open);
        assert_eq!(pos.blocks_remaining, 1);
        assert!(!schedule.evaluate(360).is_open);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(WindowSchedule::new(0, 0, 1).is_err());
        assert!(WindowSchedule::new(360, 10, 10).is_err());
        assert!(WindowSchedule::new(360, 360, 10).is_err());
        assert!(WindowSchedule::new(360, 10, 361).is_err());
    }
}
