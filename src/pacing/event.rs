//! Event-based pacing
//!
//! Produces a piecewise-constant stimulus level from a schedule of events.
//! Each event defines a window `[start, start + duration)` during which its
//! level is active; periodic events reschedule themselves `period` time
//! units later, `multiplier` times in total (0 = indefinitely).
//!
//! The machine holds a single firing slot: when a new event starts while
//! another is active, the newer event takes over, and when the firing
//! event's window closes the level drops back to zero. Queries must advance
//! monotonically in time.

use super::PacingError;

/// One event record in a pacing schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingEvent {
    /// Stimulus level while the event is active.
    pub level: f64,
    /// Time the event first occurs.
    pub start: f64,
    /// Duration of each occurrence.
    pub duration: f64,
    /// Time between occurrences, 0 for a one-off event.
    pub period: f64,
    /// Number of occurrences, 0 for indefinite repetition.
    pub multiplier: u32,
}

#[derive(Debug, Clone, Copy)]
struct Occurrence {
    start: f64,
    duration: f64,
    level: f64,
    period: f64,
    /// Occurrences left including this one; 0 means unlimited.
    left: u32,
    /// Position in the original schedule, for deterministic tie-breaking.
    order: usize,
}

/// The event-based pacing state machine.
pub struct EventPacing {
    /// Pending occurrences, ascending by (start, order).
    queue: Vec<Occurrence>,
    /// Level and window end of the currently firing event, if any.
    firing: bool,
    tdown: f64,
    level: f64,
    t: f64,
}

impl EventPacing {
    /// Ingest and validate an event schedule.
    pub fn populate(schedule: &[PacingEvent]) -> Result<Self, PacingError> {
        let mut queue = Vec::with_capacity(schedule.len());
        for (order, event) in schedule.iter().enumerate() {
            if !event.start.is_finite() {
                return Err(PacingError::Invalid(format!(
                    "event {} has a non-finite start time",
                    order
                )));
            }
            if event.duration < 0.0 || !event.duration.is_finite() {
                return Err(PacingError::Invalid(format!(
                    "event {} has an invalid duration {}",
                    order, event.duration
                )));
            }
            if event.period < 0.0 || !event.period.is_finite() {
                return Err(PacingError::Invalid(format!(
                    "event {} has an invalid period {}",
                    order, event.period
                )));
            }
            if event.multiplier > 0 && event.period == 0.0 {
                return Err(PacingError::Invalid(format!(
                    "event {} has a multiplier but no period",
                    order
                )));
            }
            if !(event.period * event.multiplier as f64).is_finite() {
                return Err(PacingError::Invalid(format!(
                    "event {} repeats beyond the representable time range",
                    order
                )));
            }
            queue.push(Occurrence {
                start: event.start,
                duration: event.duration,
                level: event.level,
                period: event.period,
                left: event.multiplier,
                order,
            });
        }
        queue.sort_by(|a, b| {
            a.start
                .total_cmp(&b.start)
                .then(a.order.cmp(&b.order))
        });
        Ok(Self {
            queue,
            firing: false,
            tdown: f64::INFINITY,
            level: 0.0,
            t: f64::NEG_INFINITY,
        })
    }

    /// Advance the machine so its level reflects the events active at `t`.
    /// Starts and stops between the previous time and `t` are processed
    /// chronologically; `t` may not decrease.
    pub fn advance(&mut self, t: f64) -> Result<(), PacingError> {
        if t < self.t {
            return Err(PacingError::NegativeTimeIncrement { t, current: self.t });
        }
        loop {
            let next_start = self.queue.first().map_or(f64::INFINITY, |o| o.start);
            let next_stop = if self.firing { self.tdown } else { f64::INFINITY };
            let boundary = next_start.min(next_stop);
            if boundary > t {
                break;
            }
            if next_stop <= next_start {
                // The firing window closes (stops apply before simultaneous
                // starts, so back-to-back pulses hand over cleanly).
                self.firing = false;
                self.level = 0.0;
                self.tdown = f64::INFINITY;
            } else {
                let occurrence = self.queue.remove(0);
                self.firing = true;
                self.level = occurrence.level;
                self.tdown = occurrence.start + occurrence.duration;
                self.reschedule(occurrence);
            }
        }
        self.t = t;
        Ok(())
    }

    fn reschedule(&mut self, mut occurrence: Occurrence) {
        if occurrence.period == 0.0 {
            return;
        }
        if occurrence.left == 1 {
            return;
        }
        if occurrence.left > 1 {
            occurrence.left -= 1;
        }
        occurrence.start += occurrence.period;
        let at = self
            .queue
            .partition_point(|o| (o.start, o.order) < (occurrence.start, occurrence.order));
        self.queue.insert(at, occurrence);
    }

    /// The next time at which the level may change: the start of the next
    /// scheduled occurrence or the end of the firing window, whichever comes
    /// first. Infinity when neither exists.
    pub fn next_time(&self) -> f64 {
        let next_start = self.queue.first().map_or(f64::INFINITY, |o| o.start);
        if self.firing {
            next_start.min(self.tdown)
        } else {
            next_start
        }
    }

    /// The currently active level, or 0 when no event is active.
    pub fn level(&self) -> f64 {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse(start: f64, duration: f64, level: f64) -> PacingEvent {
        PacingEvent {
            level,
            start,
            duration,
            period: 0.0,
            multiplier: 0,
        }
    }

    #[test]
    fn test_single_pulse() {
        let mut pacing = EventPacing::populate(&[pulse(10.0, 2.0, 1.0)]).unwrap();
        pacing.advance(0.0).unwrap();
        assert_eq!(pacing.level(), 0.0);
        assert_eq!(pacing.next_time(), 10.0);

        pacing.advance(10.0).unwrap();
        assert_eq!(pacing.level(), 1.0);
        assert_eq!(pacing.next_time(), 12.0);

        pacing.advance(11.9).unwrap();
        assert_eq!(pacing.level(), 1.0);

        pacing.advance(12.0).unwrap();
        assert_eq!(pacing.level(), 0.0);
        assert_eq!(pacing.next_time(), f64::INFINITY);
    }

    #[test]
    fn test_periodic_with_multiplier() {
        let mut pacing = EventPacing::populate(&[PacingEvent {
            level: 1.0,
            start: 10.0,
            duration: 2.0,
            period: 500.0,
            multiplier: 2,
        }])
        .unwrap();

        pacing.advance(10.5).unwrap();
        assert_eq!(pacing.level(), 1.0);
        pacing.advance(12.0).unwrap();
        assert_eq!(pacing.level(), 0.0);
        assert_eq!(pacing.next_time(), 510.0);

        pacing.advance(510.5).unwrap();
        assert_eq!(pacing.level(), 1.0);
        pacing.advance(512.0).unwrap();
        assert_eq!(pacing.level(), 0.0);

        // Two occurrences only: nothing at 1010.
        assert_eq!(pacing.next_time(), f64::INFINITY);
        pacing.advance(1020.0).unwrap();
        assert_eq!(pacing.level(), 0.0);
    }

    #[test]
    fn test_indefinite_periodic() {
        let mut pacing = EventPacing::populate(&[PacingEvent {
            level: 2.0,
            start: 0.0,
            duration: 1.0,
            period: 100.0,
            multiplier: 0,
        }])
        .unwrap();
        for beat in 0..5 {
            let start = 100.0 * beat as f64;
            pacing.advance(start + 0.5).unwrap();
            assert_eq!(pacing.level(), 2.0, "beat {}", beat);
            pacing.advance(start + 1.0).unwrap();
            assert_eq!(pacing.level(), 0.0, "beat {}", beat);
            assert_eq!(pacing.next_time(), start + 100.0);
        }
    }

    #[test]
    fn test_later_start_overrides_active_event() {
        let mut pacing =
            EventPacing::populate(&[pulse(0.0, 10.0, 1.0), pulse(4.0, 2.0, 3.0)]).unwrap();
        pacing.advance(1.0).unwrap();
        assert_eq!(pacing.level(), 1.0);
        pacing.advance(4.0).unwrap();
        assert_eq!(pacing.level(), 3.0);
        // When the later event ends the level drops to zero; the earlier
        // event does not resume.
        pacing.advance(6.0).unwrap();
        assert_eq!(pacing.level(), 0.0);
    }

    #[test]
    fn test_simultaneous_start_tie_broken_by_schedule_order() {
        let mut pacing =
            EventPacing::populate(&[pulse(5.0, 2.0, 1.0), pulse(5.0, 2.0, 7.0)]).unwrap();
        pacing.advance(5.0).unwrap();
        assert_eq!(pacing.level(), 7.0);
    }

    #[test]
    fn test_back_to_back_pulses() {
        let mut pacing =
            EventPacing::populate(&[pulse(0.0, 5.0, 1.0), pulse(5.0, 5.0, 2.0)]).unwrap();
        pacing.advance(5.0).unwrap();
        assert_eq!(pacing.level(), 2.0);
        pacing.advance(10.0).unwrap();
        assert_eq!(pacing.level(), 0.0);
    }

    #[test]
    fn test_monotonicity_enforced() {
        let mut pacing = EventPacing::populate(&[pulse(10.0, 2.0, 1.0)]).unwrap();
        pacing.advance(20.0).unwrap();
        assert!(matches!(
            pacing.advance(19.0),
            Err(PacingError::NegativeTimeIncrement { .. })
        ));
    }

    #[test]
    fn test_validation() {
        let bad_duration = PacingEvent {
            level: 1.0,
            start: 0.0,
            duration: -1.0,
            period: 0.0,
            multiplier: 0,
        };
        assert!(EventPacing::populate(&[bad_duration]).is_err());

        let bad_period = PacingEvent {
            level: 1.0,
            start: 0.0,
            duration: 1.0,
            period: -5.0,
            multiplier: 0,
        };
        assert!(EventPacing::populate(&[bad_period]).is_err());

        let multiplier_without_period = PacingEvent {
            level: 1.0,
            start: 0.0,
            duration: 1.0,
            period: 0.0,
            multiplier: 3,
        };
        assert!(EventPacing::populate(&[multiplier_without_period]).is_err());

        let overflowing = PacingEvent {
            level: 1.0,
            start: 0.0,
            duration: 1.0,
            period: f64::MAX,
            multiplier: 3,
        };
        assert!(EventPacing::populate(&[overflowing]).is_err());
    }

    #[test]
    fn test_empty_schedule() {
        let mut pacing = EventPacing::populate(&[]).unwrap();
        pacing.advance(1000.0).unwrap();
        assert_eq!(pacing.level(), 0.0);
        assert_eq!(pacing.next_time(), f64::INFINITY);
    }

    #[test]
    fn test_level_constant_between_boundaries() {
        let mut pacing = EventPacing::populate(&[pulse(10.0, 2.0, 1.0)]).unwrap();
        let mut previous_boundary = 0.0;
        for i in 0..200 {
            let t = 0.1 * i as f64;
            pacing.advance(t).unwrap();
            let expected = if (10.0..12.0).contains(&t) { 1.0 } else { 0.0 };
            assert_eq!(pacing.level(), expected, "at t={}", t);
            assert!(pacing.next_time() > t || pacing.next_time().is_infinite());
            assert!(t >= previous_boundary);
            previous_boundary = t;
        }
    }
}
