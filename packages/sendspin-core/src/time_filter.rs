//! Two-dimensional Kalman filter estimating client↔server clock offset and
//! drift from periodic `client/time`/`server/time` round-trip samples.

use crate::protocol_constants::{DEFAULT_FORGET_FACTOR, DEFAULT_PROCESS_STD, FORGET_COUNT_THRESHOLD, FORGET_CUTOFF_RATIO};

/// Offset/drift estimator for one client's clock relative to the server's.
///
/// `offset_us` is the estimated server-minus-client offset in microseconds;
/// `drift` is dimensionless (additional offset per client-microsecond
/// elapsed). The covariance triple `(p_oo, p_od, p_dd)` is the symmetric 2×2
/// state covariance of `(offset, drift)`.
#[derive(Debug, Clone)]
pub struct TimeFilter {
    offset_us: f64,
    drift: f64,
    last_update_us: Option<i64>,
    count: u32,

    p_oo: f64,
    p_od: f64,
    p_dd: f64,
    q: f64,
    forget: f64,
}

impl Default for TimeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_STD, DEFAULT_FORGET_FACTOR)
    }
}

impl TimeFilter {
    /// `process_std` and `forget_factor` are the tunables; the filter stores
    /// their squares (`Q`, `forget`) internally.
    pub fn new(process_std: f64, forget_factor: f64) -> Self {
        Self {
            offset_us: 0.0,
            drift: 0.0,
            last_update_us: None,
            count: 0,
            p_oo: 0.0,
            p_od: 0.0,
            p_dd: 0.0,
            q: process_std * process_std,
            forget: forget_factor * forget_factor,
        }
    }

    /// Feeds one round-trip sample. `measurement` is the derived offset
    /// (server-minus-client), `max_error` is the derived one-way delay
    /// bound, `t` is the local receive timestamp in microseconds.
    pub fn update(&mut self, measurement: f64, max_error: f64, t: i64) {
        let last = match self.last_update_us {
            Some(last) if last == t => return,
            Some(last) => last,
            None => {
                self.bootstrap_first(measurement, max_error, t);
                return;
            }
        };

        let dt = (t - last) as f64;
        let r_var = max_error * max_error;

        if self.count == 1 {
            self.drift = (measurement - self.offset_us) / dt;
            self.offset_us = measurement;
            self.p_dd = (self.p_oo + r_var) / dt;
            self.p_oo = r_var;
            self.count = 2;
            self.last_update_us = Some(t);
            return;
        }

        let predicted_offset = self.offset_us + self.drift * dt;
        let mut p_oo = self.p_oo + 2.0 * self.p_od * dt + self.p_dd * dt * dt + self.q * dt;
        let mut p_od = self.p_od + self.p_dd * dt;
        let mut p_dd = self.p_dd;

        let residual = measurement - predicted_offset;

        if self.count < FORGET_COUNT_THRESHOLD {
            self.count += 1;
        } else if residual.abs() > max_error * FORGET_CUTOFF_RATIO {
            p_oo *= self.forget;
            p_od *= self.forget;
            p_dd *= self.forget;
        }

        let u = 1.0 / (p_oo + r_var);
        let k_o = p_oo * u;
        let k_d = p_od * u;

        self.offset_us = predicted_offset + k_o * residual;
        self.drift += k_d * residual;
        self.p_oo = p_oo - k_o * p_oo;
        self.p_od = p_od - k_d * p_oo;
        self.p_dd = p_dd - k_d * p_od;

        self.last_update_us = Some(t);
    }

    fn bootstrap_first(&mut self, measurement: f64, max_error: f64, t: i64) {
        self.offset_us = measurement;
        self.p_oo = max_error * max_error;
        self.drift = 0.0;
        self.count = 1;
        self.last_update_us = Some(t);
    }

    /// Projects a client-side timestamp `c` onto the server's clock.
    pub fn server_from_client(&self, c: i64) -> i64 {
        let last = self.last_update_us.unwrap_or(c);
        let projected = self.offset_us + self.drift * ((c - last) as f64);
        c + projected.round() as i64
    }

    /// Projects a server-side timestamp `s` back onto this client's clock.
    pub fn client_from_server(&self, s: i64) -> i64 {
        let last = self.last_update_us.unwrap_or(s);
        let numerator = (s as f64) - self.offset_us + self.drift * (last as f64);
        (numerator / (1.0 + self.drift)).round() as i64
    }

    /// Returns the filter to its pre-bootstrap state.
    pub fn reset(&mut self) {
        *self = Self::new(self.q.sqrt(), self.forget.sqrt());
    }

    pub fn is_synchronized(&self) -> bool {
        self.count >= 2 && self.p_oo.is_finite()
    }

    /// One-sigma offset uncertainty, in microseconds, rounded to the
    /// nearest integer.
    pub fn error(&self) -> i64 {
        self.p_oo.sqrt().round() as i64
    }

    pub fn offset_us(&self) -> f64 {
        self.offset_us
    }

    pub fn drift(&self) -> f64 {
        self.drift
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_sequence_matches_spec_scenario() {
        let mut filter = TimeFilter::default();
        filter.update(100.0, 10.0, 0);
        assert!(!filter.is_synchronized());

        filter.update(120.0, 10.0, 1_000_000);
        assert!(filter.is_synchronized());
        assert!((filter.drift() - 20e-6).abs() < 1e-9);
        assert!((filter.offset_us() - 120.0).abs() < 1e-9);

        filter.update(140.0, 10.0, 2_000_000);
        filter.update(160.0, 10.0, 3_000_000);
        assert!(filter.is_synchronized());
        assert!(filter.error() >= 0);
    }

    #[test]
    fn duplicate_timestamp_is_a_no_op() {
        let mut filter = TimeFilter::default();
        filter.update(100.0, 10.0, 0);
        filter.update(120.0, 10.0, 1_000_000);
        let before = (filter.offset_us(), filter.drift(), filter.count());
        filter.update(999.0, 10.0, 1_000_000);
        assert_eq!((filter.offset_us(), filter.drift(), filter.count()), before);
    }

    #[test]
    fn covariance_stays_nonnegative_and_projection_round_trips() {
        let mut filter = TimeFilter::default();
        let samples = [
            (100.0, 10.0, 0),
            (120.0, 10.0, 1_000_000),
            (140.0, 10.0, 2_000_000),
            (160.0, 10.0, 3_000_000),
            (181.0, 10.0, 4_000_000),
        ];
        for (m, e, t) in samples {
            filter.update(m, e, t);
            assert!(filter.p_oo >= -1e-6);
            assert!(filter.p_dd >= -1e-6);
            assert!(filter.p_oo * filter.p_dd - filter.p_od * filter.p_od >= -1e-3);
        }
        let server_ts = filter.server_from_client(4_000_000);
        let client_ts = filter.client_from_server(server_ts);
        assert!((client_ts - 4_000_000).abs() <= 1);
    }

    #[test]
    fn reset_returns_to_unsynchronized_state() {
        let mut filter = TimeFilter::default();
        filter.update(100.0, 10.0, 0);
        filter.update(120.0, 10.0, 1_000_000);
        assert!(filter.is_synchronized());
        filter.reset();
        assert!(!filter.is_synchronized());
        assert_eq!(filter.count(), 0);
    }
}
