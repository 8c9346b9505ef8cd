//! Synthetic capture data generator for stress testing and benchmarking.
//!
//! Generates routes that were driven repeatedly by several acquisitions, in
//! either direction, with positional jitter, so every route contains dense
//! clusters of near-duplicate captures.
//!
//! Feature-gated behind `synthetic`; not included in production builds.
//!
//! # Example
//!
//! ```rust
//! use tracededup::synthetic::SyntheticScenario;
//!
//! let scenario = SyntheticScenario {
//!     route_count: 4,
//!     acquisitions: 3,
//!     ..SyntheticScenario::default()
//! };
//!
//! let records = scenario.generate();
//! assert_eq!(records.len(), scenario.expected_len());
//! ```

use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Direction, Record};

/// Parameters for a synthetic dataset.
#[derive(Debug, Clone)]
pub struct SyntheticScenario {
    pub route_count: usize,
    /// Length of every route in distance units.
    pub route_length: f64,
    /// Number of acquisitions that drove every route.
    pub acquisitions: usize,
    /// Nominal spacing between consecutive captures of one pass.
    pub spacing: f64,
    /// Maximum absolute positional noise added to each capture.
    pub jitter: f64,
    /// Acquisition dates are spread uniformly over this many days.
    pub date_spread_days: i64,
    pub seed: u64,
}

impl Default for SyntheticScenario {
    fn default() -> Self {
        Self {
            route_count: 10,
            route_length: 500.0,
            acquisitions: 4,
            spacing: 5.0,
            jitter: 1.5,
            date_spread_days: 120,
            seed: 42,
        }
    }
}

impl SyntheticScenario {
    /// Captures per pass along one route.
    pub fn captures_per_pass(&self) -> usize {
        if self.spacing <= 0.0 {
            return 0;
        }
        (self.route_length / self.spacing).floor() as usize + 1
    }

    /// Number of records `generate` returns.
    pub fn expected_len(&self) -> usize {
        self.route_count * self.acquisitions * self.captures_per_pass()
    }

    /// Generate the dataset. Same seed, same records.
    pub fn generate(&self) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let origin = Utc
            .with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
            .single()
            .unwrap_or_default();
        let per_pass = self.captures_per_pass();

        let acquisition_dates: Vec<_> = (0..self.acquisitions)
            .map(|_| origin + Duration::days(rng.gen_range(0..=self.date_spread_days.max(0))))
            .collect();

        let mut records = Vec::with_capacity(self.expected_len());
        for route in 0..self.route_count {
            let route_id = format!("R{:04}", route);
            for (acq, started) in acquisition_dates.iter().enumerate() {
                let direction = if rng.gen_bool(0.5) {
                    Direction::Plus
                } else {
                    Direction::Minus
                };
                for step in 0..per_pass {
                    // Minus passes travel from the far end back to zero
                    let nominal = match direction {
                        Direction::Plus => step as f64 * self.spacing,
                        Direction::Minus => self.route_length - step as f64 * self.spacing,
                    };
                    let noise = if self.jitter > 0.0 {
                        rng.gen_range(-self.jitter..=self.jitter)
                    } else {
                        0.0
                    };
                    let position = (nominal + noise).clamp(0.0, self.route_length);

                    records.push(
                        Record::new(format!("{}-A{}-{}", route_id, acq, step), &route_id, position)
                            .acquisition(format!("A{}", acq))
                            .relative_position(step as f64 * self.spacing)
                            .direction(direction)
                            .sequence(step as i64)
                            .captured_at(*started + Duration::seconds(step as i64))
                            .quality(rng.gen_range(0.0..1.0)),
                    );
                }
            }
        }

        records
    }
}
