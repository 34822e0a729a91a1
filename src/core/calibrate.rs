use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{AnalysisError, Result};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMethod {
    #[default]
    FixedStep,
    // Doubles the stride until net revenue changes sign, then bisects.
    Bisect,
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationConfig {
    pub target_revenue: f64,
    pub tolerance: f64,
    pub step: f64,
    pub max_iterations: u32,
    pub method: SearchMethod,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            target_revenue: 0.0,
            tolerance: 1e9,
            step: 52.0,
            max_iterations: 1_000,
            method: SearchMethod::FixedStep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationIteration {
    pub iteration: u32,
    pub value: f64,
    pub net_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    pub value: f64,
    pub net_revenue: f64,
    pub method: SearchMethod,
    pub iterations: Vec<CalibrationIteration>,
}

/// `revenue / population` truncated to a multiple of `granularity`, e.g.
/// whole pounds per week expressed per year with a granularity of 52.
pub fn initial_estimate(revenue: f64, population: f64, granularity: f64) -> Result<f64> {
    if !revenue.is_finite() {
        return Err(AnalysisError::InvalidCalibrationConfig(
            "revenue must be finite".to_string(),
        ));
    }
    if !population.is_finite() || population <= 0.0 {
        return Err(AnalysisError::InvalidCalibrationConfig(format!(
            "population must be > 0, got {population}"
        )));
    }
    if !granularity.is_finite() || granularity <= 0.0 {
        return Err(AnalysisError::InvalidCalibrationConfig(format!(
            "granularity must be > 0, got {granularity}"
        )));
    }
    Ok((revenue / population / granularity).trunc() * granularity)
}

/// Search the step grid `initial_guess + k * step` for a value whose net
/// revenue is within `tolerance` of the target.
///
/// `evaluate` is called exactly once per trial and never twice for the same
/// grid point. The first move assumes net revenue falls as the parameter
/// rises (a payment that costs money); if that move makes things worse
/// without crossing zero, the direction is flipped once. Proposing a grid
/// point already tried, or running out of iterations, fails with
/// [`AnalysisError::CalibrationFailed`] carrying the closest trial. A
/// non-finite net revenue is a collaborator failure and stops the search
/// with [`AnalysisError::Simulation`].
pub fn calibrate<F>(initial_guess: f64, config: CalibrationConfig, evaluate: F) -> Result<Calibration>
where
    F: FnMut(f64) -> Result<f64>,
{
    validate_config(initial_guess, config)?;

    let mut state = CalibrationState::new(initial_guess, config, evaluate);
    let net = state.trial(0)?;
    match config.method {
        SearchMethod::FixedStep => walk(state, net),
        SearchMethod::Bisect => bracket_and_bisect(state, net),
    }
}

fn validate_config(initial_guess: f64, config: CalibrationConfig) -> Result<()> {
    let invalid = |msg: &str| Err(AnalysisError::InvalidCalibrationConfig(msg.to_string()));
    if !initial_guess.is_finite() {
        return invalid("initial guess must be finite");
    }
    if !config.target_revenue.is_finite() {
        return invalid("target revenue must be finite");
    }
    if !config.step.is_finite() || config.step == 0.0 {
        return invalid("step must be finite and non-zero");
    }
    if config.tolerance.is_nan() || config.tolerance < 0.0 {
        return invalid("tolerance must be >= 0");
    }
    if config.max_iterations == 0 {
        return invalid("max_iterations must be > 0");
    }
    Ok(())
}

struct CalibrationState<F> {
    origin: f64,
    step: f64,
    config: CalibrationConfig,
    evaluate: F,
    visited: HashSet<i64>,
    trials: Vec<CalibrationIteration>,
}

impl<F> CalibrationState<F>
where
    F: FnMut(f64) -> Result<f64>,
{
    fn new(origin: f64, config: CalibrationConfig, evaluate: F) -> Self {
        Self {
            origin,
            step: config.step.abs(),
            config,
            evaluate,
            visited: HashSet::new(),
            trials: Vec::new(),
        }
    }

    fn value(&self, k: i64) -> f64 {
        self.origin + k as f64 * self.step
    }

    fn trial(&mut self, k: i64) -> Result<f64> {
        let value = self.value(k);
        let net_revenue = (self.evaluate)(value)? - self.config.target_revenue;
        if !net_revenue.is_finite() {
            return Err(AnalysisError::Simulation(format!(
                "non-finite net revenue {net_revenue} at {value}"
            )));
        }
        self.visited.insert(k);
        let iteration = self.trials.len() as u32 + 1;
        self.trials.push(CalibrationIteration {
            iteration,
            value,
            net_revenue,
        });
        debug!(iteration, value, net_revenue, "calibration trial");
        Ok(net_revenue)
    }

    fn converged(&self, net: f64) -> bool {
        net.abs() <= self.config.tolerance
    }

    fn exhausted(&self) -> bool {
        self.trials.len() >= self.config.max_iterations as usize
    }

    fn finish(self, k: i64, net_revenue: f64) -> Result<Calibration> {
        let value = self.value(k);
        info!(
            value,
            net_revenue,
            iterations = self.trials.len(),
            "calibration converged"
        );
        Ok(Calibration {
            value,
            net_revenue,
            method: self.config.method,
            iterations: self.trials,
        })
    }

    fn fail(self, reason: &str) -> Result<Calibration> {
        let best = self
            .trials
            .iter()
            .min_by(|a, b| a.net_revenue.abs().total_cmp(&b.net_revenue.abs()))
            .copied();
        let (best_effort, net_revenue) = best.map_or((self.origin, f64::NAN), |t| {
            (t.value, t.net_revenue)
        });
        let iterations = self.trials.len() as u32;
        warn!(reason, best_effort, net_revenue, iterations, "calibration did not converge");
        Err(AnalysisError::CalibrationFailed {
            best_effort,
            net_revenue,
            iterations,
        })
    }
}

fn sign(net: f64) -> i64 {
    if net > 0.0 { 1 } else { -1 }
}

fn same_sign(a: f64, b: f64) -> bool {
    (a > 0.0) == (b > 0.0)
}

fn walk<F>(mut state: CalibrationState<F>, mut net: f64) -> Result<Calibration>
where
    F: FnMut(f64) -> Result<f64>,
{
    let mut k = 0_i64;
    let mut orientation = 1_i64;
    let mut orientation_known = false;

    loop {
        if state.converged(net) {
            return state.finish(k, net);
        }
        if state.exhausted() {
            return state.fail("iteration cap reached");
        }

        let next = k + orientation * sign(net);
        if state.visited.contains(&next) {
            return state.fail("step oscillates around the target");
        }
        let next_net = state.trial(next)?;

        if !orientation_known && same_sign(net, next_net) && next_net.abs() > net.abs() {
            orientation = -orientation;
            orientation_known = true;
            continue;
        }
        orientation_known = true;
        k = next;
        net = next_net;
    }
}

fn bracket_and_bisect<F>(mut state: CalibrationState<F>, net: f64) -> Result<Calibration>
where
    F: FnMut(f64) -> Result<f64>,
{
    let (mut lo, mut lo_net) = (0_i64, net);
    let mut orientation = 1_i64;
    let mut orientation_known = false;
    let mut stride = 1_i64;

    let (mut hi, mut hi_net) = loop {
        if state.converged(lo_net) {
            return state.finish(lo, lo_net);
        }
        if state.exhausted() {
            return state.fail("iteration cap reached while bracketing");
        }

        let Some(next) = stride
            .checked_mul(orientation * sign(lo_net))
            .and_then(|delta| lo.checked_add(delta))
        else {
            return state.fail("bracket expanded past the grid");
        };
        if state.visited.contains(&next) {
            return state.fail("bracket search revisited a trial");
        }
        let next_net = state.trial(next)?;

        if !orientation_known && same_sign(lo_net, next_net) && next_net.abs() > lo_net.abs() {
            orientation = -orientation;
            orientation_known = true;
            continue;
        }
        orientation_known = true;

        if state.converged(next_net) {
            return state.finish(next, next_net);
        }
        if !same_sign(lo_net, next_net) {
            break (next, next_net);
        }
        lo = next;
        lo_net = next_net;
        stride = stride.saturating_mul(2);
    };

    loop {
        if state.exhausted() {
            return state.fail("iteration cap reached while bisecting");
        }
        let mid = lo + (hi - lo) / 2;
        if mid == lo || mid == hi {
            return state.fail("bracket narrowed to adjacent grid points");
        }
        let mid_net = state.trial(mid)?;
        if state.converged(mid_net) {
            return state.finish(mid, mid_net);
        }
        if same_sign(mid_net, lo_net) {
            lo = mid;
            lo_net = mid_net;
        } else {
            hi = mid;
            hi_net = mid_net;
        }
        debug!(lo, hi, lo_net, hi_net, "bisection bracket");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assume, proptest};
    use std::cell::Cell;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn config(tolerance: f64, step: f64) -> CalibrationConfig {
        CalibrationConfig {
            target_revenue: 0.0,
            tolerance,
            step,
            max_iterations: 1_000,
            method: SearchMethod::FixedStep,
        }
    }

    // Revenue raised by a £x/year payment: falls by 5e7 per pound, zero at 2000.
    fn ubi_revenue(x: f64) -> Result<f64> {
        Ok(1e11 - 5e7 * x)
    }

    #[test]
    fn initial_estimate_truncates_to_whole_weekly_amounts() {
        let estimate = initial_estimate(50e9, 40e6, 52.0).expect("valid inputs");
        assert_close(estimate, 1248.0, 1e-9);
        assert_close(initial_estimate(-50e9, 40e6, 52.0).expect("valid"), -1248.0, 1e-9);
        assert!(matches!(
            initial_estimate(1.0, 0.0, 52.0),
            Err(AnalysisError::InvalidCalibrationConfig(_))
        ));
        assert!(matches!(
            initial_estimate(1.0, 10.0, 0.0),
            Err(AnalysisError::InvalidCalibrationConfig(_))
        ));
    }

    #[test]
    fn walks_upward_while_in_surplus() {
        let result = calibrate(1560.0, config(2e9, 52.0), ubi_revenue).expect("converges");
        assert_close(result.value, 1976.0, 1e-9);
        assert_eq!(result.iterations.len(), 9);
        assert!(result.net_revenue.abs() <= 2e9);
        for pair in result.iterations.windows(2) {
            assert_close(pair[1].value - pair[0].value, 52.0, 1e-9);
        }
    }

    #[test]
    fn oscillation_around_root_reports_best_effort() {
        let err = calibrate(1560.0, config(1e9, 52.0), ubi_revenue).expect_err("stalls");
        match err {
            AnalysisError::CalibrationFailed {
                best_effort,
                net_revenue,
                iterations,
            } => {
                assert_close(best_effort, 1976.0, 1e-9);
                assert_close(net_revenue, 1.2e9, 1.0);
                assert_eq!(iterations, 10);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn generous_tolerance_accepts_initial_guess() {
        let result = calibrate(1000.0, config(1e9, 52.0), |x| Ok(2.0 * x - 5000.0))
            .expect("within tolerance immediately");
        assert_close(result.value, 1000.0, 1e-9);
        assert_eq!(result.iterations.len(), 1);
    }

    #[test]
    fn increasing_response_flips_direction_once() {
        let result =
            calibrate(1000.0, config(60.0, 52.0), |x| Ok(2.0 * x - 5000.0)).expect("converges");
        assert_close(result.value, 2508.0, 1e-9);
        assert!((result.value - 2500.0).abs() <= 30.0);
        assert_close(result.iterations[1].value, 948.0, 1e-9);
        assert_eq!(result.iterations.len(), 31);
    }

    #[test]
    fn target_revenue_shifts_the_root() {
        let mut cfg = config(1.0, 1.0);
        cfg.target_revenue = 100.0;
        let result = calibrate(0.0, cfg, |x| Ok(-x)).expect("converges");
        assert_close(result.value, -100.0, 1e-9);
        assert_close(result.net_revenue, 0.0, 1e-9);
    }

    #[test]
    fn bisect_needs_fewer_evaluations_than_walking() {
        let mut cfg = config(60.0, 52.0);
        let walked = calibrate(1000.0, cfg, |x| Ok(2.0 * x - 5000.0)).expect("converges");
        cfg.method = SearchMethod::Bisect;
        let bisected = calibrate(1000.0, cfg, |x| Ok(2.0 * x - 5000.0)).expect("converges");

        assert_close(bisected.value, 2508.0, 1e-9);
        assert_eq!(bisected.method, SearchMethod::Bisect);
        assert!(bisected.iterations.len() < walked.iterations.len());
    }

    #[test]
    fn bisect_reports_stall_between_adjacent_grid_points() {
        let mut cfg = config(1e9, 52.0);
        cfg.method = SearchMethod::Bisect;
        let err = calibrate(1560.0, cfg, ubi_revenue).expect_err("no grid point within tolerance");
        assert!(matches!(
            err,
            AnalysisError::CalibrationFailed { best_effort, .. } if (best_effort - 1976.0).abs() < 1e-9
        ));
    }

    #[test]
    fn invalid_configs_fail_before_any_evaluation() {
        let calls = Cell::new(0);
        let counting = |x: f64| {
            calls.set(calls.get() + 1);
            Ok(x)
        };

        let mut cfg = config(1.0, 0.0);
        assert!(matches!(
            calibrate(0.0, cfg, counting),
            Err(AnalysisError::InvalidCalibrationConfig(_))
        ));
        cfg = config(-1.0, 1.0);
        assert!(matches!(
            calibrate(0.0, cfg, counting),
            Err(AnalysisError::InvalidCalibrationConfig(_))
        ));
        cfg = config(1.0, 1.0);
        cfg.max_iterations = 0;
        assert!(matches!(
            calibrate(0.0, cfg, counting),
            Err(AnalysisError::InvalidCalibrationConfig(_))
        ));
        assert!(matches!(
            calibrate(f64::NAN, config(1.0, 1.0), counting),
            Err(AnalysisError::InvalidCalibrationConfig(_))
        ));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn two_valued_response_terminates_without_converging() {
        let flip = |x: f64| Ok(if (x / 10.0).round() as i64 % 2 == 0 { 100.0 } else { -100.0 });
        for method in [SearchMethod::FixedStep, SearchMethod::Bisect] {
            let mut cfg = config(1.0, 10.0);
            cfg.method = method;
            let err = calibrate(0.0, cfg, flip).expect_err("cannot converge");
            assert!(matches!(err, AnalysisError::CalibrationFailed { iterations, .. } if iterations <= 3));
        }
    }

    #[test]
    fn flat_response_stops_at_iteration_cap() {
        let mut cfg = config(1.0, 1.0);
        cfg.max_iterations = 25;
        let err = calibrate(0.0, cfg, |_| Ok(100.0)).expect_err("flat response");
        assert!(matches!(err, AnalysisError::CalibrationFailed { iterations: 25, .. }));
    }

    #[test]
    fn evaluation_errors_propagate() {
        let err = calibrate(0.0, config(1.0, 1.0), |x| {
            if x > 2.0 {
                Err(AnalysisError::Simulation("engine offline".to_string()))
            } else {
                Ok(1_000.0)
            }
        })
        .expect_err("engine fails");
        assert_eq!(err, AnalysisError::Simulation("engine offline".to_string()));
    }

    #[test]
    fn non_finite_net_revenue_stops_after_one_evaluation() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            for method in [SearchMethod::FixedStep, SearchMethod::Bisect] {
                let calls = Cell::new(0);
                let mut cfg = config(1e9, 52.0);
                cfg.method = method;
                let err = calibrate(1000.0, cfg, |_| {
                    calls.set(calls.get() + 1);
                    Ok(bad)
                })
                .expect_err("broken response");
                assert!(matches!(err, AnalysisError::Simulation(ref msg) if msg.contains("non-finite")));
                assert_eq!(calls.get(), 1);
            }
        }
    }

    #[test]
    fn trial_values_are_never_repeated() {
        let seen = std::cell::RefCell::new(Vec::<f64>::new());
        let _ = calibrate(0.0, config(0.5, 1.0), |x| {
            seen.borrow_mut().push(x);
            Ok((x - 7.3).abs() + 3.0)
        });
        let values = seen.into_inner();
        for (i, a) in values.iter().enumerate() {
            for b in &values[i + 1..] {
                assert!((a - b).abs() > 1e-9, "value {a} evaluated twice");
            }
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_linear_response_converges_near_root(
            slope in -8.0f64..8.0,
            root in -1_000.0f64..1_000.0,
            start in -1_000.0f64..1_000.0,
            bisect in proptest::bool::ANY,
        ) {
            prop_assume!(slope.abs() >= 0.25);
            let step = 1.0;
            let tolerance = slope.abs() * step;
            let cfg = CalibrationConfig {
                target_revenue: 0.0,
                tolerance,
                step,
                max_iterations: 10_000,
                method: if bisect { SearchMethod::Bisect } else { SearchMethod::FixedStep },
            };
            let result = calibrate(start, cfg, |x| Ok(slope * (x - root)))
                .expect("fine step on a linear response converges");

            prop_assert!(result.net_revenue.abs() <= tolerance);
            prop_assert!((result.value - root).abs() <= step + 1e-9);
            prop_assert!(result.iterations.len() <= 2_100);
        }
    }
}
