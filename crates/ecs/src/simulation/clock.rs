//! Discrete simulation clock.

use crate::types::{SimulationContext, time_epsilon};

/// Produces `start + tick·dt` for tick = 0, 1, ... until the next time would
/// exceed `end`.
#[derive(Debug, Clone)]
pub(crate) struct Clock {
    start: f64,
    end: f64,
    dt: f64,
    next_tick: u64,
}

impl Clock {
    pub fn new(start: f64, end: f64, dt: f64) -> Self {
        Self {
            start,
            end,
            dt,
            next_tick: 0,
        }
    }

    fn time_of(&self, tick: u64) -> f64 {
        self.start + tick as f64 * self.dt
    }

    /// True once every tick up to `end` has been produced.
    pub fn is_exhausted(&self) -> bool {
        self.time_of(self.next_tick) > self.end + time_epsilon(self.dt)
    }

    /// Context for the next tick, or `None` when the clock is exhausted.
    pub fn advance(&mut self) -> Option<SimulationContext> {
        if self.is_exhausted() {
            return None;
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        Some(SimulationContext {
            tick,
            time: self.time_of(tick),
            dt: self.dt,
            start: self.start,
            end: self.end,
        })
    }

    /// Number of ticks produced so far.
    pub fn ticks(&self) -> u64 {
        self.next_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_at_start() {
        let mut clock = Clock::new(10.0, 12.0, 1.0);
        let times: Vec<f64> = std::iter::from_fn(|| clock.advance()).map(|c| c.time).collect();
        assert_eq!(times, vec![10.0, 11.0, 12.0]);
        assert!(clock.is_exhausted());
        assert_eq!(clock.ticks(), 3);
    }

    #[test]
    fn test_partial_last_step_not_taken() {
        let mut clock = Clock::new(0.0, 2.5, 1.0);
        let ticks: Vec<u64> = std::iter::from_fn(|| clock.advance()).map(|c| c.tick).collect();
        assert_eq!(ticks, vec![0, 1, 2]);
    }

    #[test]
    fn test_final_tick_flag_matches_exhaustion() {
        let mut clock = Clock::new(0.0, 0.3, 0.1);
        let mut finals = Vec::new();
        while let Some(ctx) = clock.advance() {
            finals.push(ctx.is_final_tick());
        }
        assert_eq!(finals, vec![false, false, false, true]);
    }
}
