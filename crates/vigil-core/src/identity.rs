//! The operated identity and the progress made with it.

use serde::{Deserialize, Serialize};

/// The account currently being automated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub secret: String,
    pub region: String,
    /// Tag of whoever supplied the identity.
    pub origin: String,
}

/// A fresh identity handed out by the remote controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityGrant {
    pub identity: Identity,
    pub required_delta: i64,
}

/// Outcome of feeding a counter reading into [`TaskProgress::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First reading for this identity; it became the start counter.
    Baseline,
    /// The reading was accepted.
    Advanced { gained: i64 },
    /// The reading went backwards and was discarded.
    Rejected { current: i64, reading: i64 },
}

/// Progress toward the configured counter delta.
///
/// `current - start` never decreases: readings below the last accepted value
/// are treated as recognition noise and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub start: Option<i64>,
    pub current: Option<i64>,
    pub required_delta: i64,
}

impl TaskProgress {
    pub fn new(start: Option<i64>, required_delta: i64) -> Self {
        Self {
            start,
            current: None,
            required_delta,
        }
    }

    /// Records a counter reading.
    pub fn observe(&mut self, reading: i64) -> Observation {
        let Some(start) = self.start else {
            self.start = Some(reading);
            self.current = Some(reading);
            return Observation::Baseline;
        };

        if let Some(current) = self.current {
            if reading < current {
                return Observation::Rejected { current, reading };
            }
        }

        self.current = Some(reading);
        Observation::Advanced {
            gained: reading - start,
        }
    }

    /// `current - start`, once both are known.
    pub fn gained(&self) -> Option<i64> {
        match (self.start, self.current) {
            (Some(start), Some(current)) => Some(current - start),
            _ => None,
        }
    }

    /// How much is still missing, once a reading exists.
    pub fn remaining(&self) -> Option<i64> {
        self.gained().map(|gained| self.required_delta - gained)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.remaining(), Some(remaining) if remaining <= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reading_is_baseline() {
        let mut progress = TaskProgress::new(None, 100);
        assert_eq!(progress.observe(40), Observation::Baseline);
        assert_eq!(progress.start, Some(40));
        assert_eq!(progress.gained(), Some(0));
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_gain_never_decreases() {
        let mut progress = TaskProgress::new(Some(10), 100);
        assert_eq!(progress.observe(30), Observation::Advanced { gained: 20 });
        assert_eq!(
            progress.observe(25),
            Observation::Rejected {
                current: 30,
                reading: 25
            }
        );
        assert_eq!(progress.gained(), Some(20));
        assert_eq!(progress.observe(30), Observation::Advanced { gained: 20 });
    }

    #[test]
    fn test_completion_at_required_delta() {
        let mut progress = TaskProgress::new(Some(0), 50);
        progress.observe(49);
        assert!(!progress.is_complete());
        assert_eq!(progress.remaining(), Some(1));
        progress.observe(50);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_no_reading_is_not_complete() {
        let progress = TaskProgress::new(Some(0), 0);
        assert_eq!(progress.remaining(), None);
        assert!(!progress.is_complete());
    }
}
