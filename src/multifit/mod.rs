#![warn(clippy::pedantic)]
#![allow(clippy::similar_names, clippy::cast_precision_loss)]

//! Levenberg-Marquardt fit of a Gaussian dip on a baseline,
//! `y = offset + amplitude * exp(-(x - center)^2 / (2 sigma^2))`.

use nalgebra::{Matrix4, Vector4};
use thiserror::Error;

use crate::scan::Resonance;

#[cfg(test)]
mod tests;

pub const NUM_PARAMS: usize = 4;

const MIN_LAMBDA: f64 = 1.0e-12;
const MAX_LAMBDA: f64 = 1.0e16;
// floor for the Marquardt scaling so a parameter with zero gradient still gets damped
const MIN_DIAG: f64 = 1.0e-12;

/// Parameters are `[amplitude, center, sigma, offset]`; a dip has `amplitude < 0`.
#[inline]
#[must_use]
pub fn modified_gauss(x: f64, params: [f64; 4]) -> f64 {
    let [amplitude, center, sigma, offset] = params;
    let dx = x - center;
    offset + amplitude * (-dx * dx / (2.0 * sigma * sigma)).exp()
}

#[inline]
fn gradient(x: f64, params: [f64; 4]) -> Vector4<f64> {
    let [amplitude, center, sigma, _] = params;
    let dx = x - center;
    let s2 = sigma * sigma;
    let g = (-dx * dx / (2.0 * s2)).exp();
    Vector4::new(
        g,
        amplitude * g * dx / s2,
        amplitude * g * dx * dx / (s2 * sigma),
        1.0,
    )
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitFailure {
    #[error("{got} samples cannot constrain the model (need at least {needed})")]
    InsufficientSamples { got: usize, needed: usize },
    #[error("x and y differ in length ({x} vs {y})")]
    MismatchedLengths { x: usize, y: usize },
    #[error("no convergence after {iterations} iterations")]
    NotConverged { iterations: u32 },
    #[error("degenerate fit: {0}")]
    Degenerate(&'static str),
}

#[derive(Debug, Clone)]
pub struct Fit {
    pub params: [f64; 4],
    pub param_errs: [f64; 4],
    /// model evaluated at each input x
    pub fitted: Vec<f64>,
    /// one-sigma uncertainty of `fitted` at each input x
    pub band: Vec<f64>,
    pub n_iterations: u32,
    pub red_chisq: f64,
}

impl Fit {
    #[inline]
    #[must_use]
    pub fn center(&self) -> f64 {
        self.params[1]
    }

    /// The resonance sits at the minimum of the fitted curve (not of the raw data). Its weight
    /// is `|fitted minimum| / (2 * band at the minimum)`.
    /// # Errors
    /// `Degenerate` if the weight is not a finite number, e.g. for a band of zero width.
    pub fn resonance(&self, x: &[f64]) -> Result<Resonance, FitFailure> {
        if x.len() != self.fitted.len() {
            return Err(FitFailure::MismatchedLengths {
                x: x.len(),
                y: self.fitted.len(),
            });
        }
        let (idx, min_y) = self
            .fitted
            .iter()
            .copied()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or(FitFailure::Degenerate("empty fit"))?;
        let weight = (min_y / (self.band[idx] * 2.0)).abs();
        if !weight.is_finite() {
            return Err(FitFailure::Degenerate("zero fit error at resonance"));
        }
        Ok(Resonance {
            frequency: x[idx],
            weight,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSetup {
    pub max_iterations: u32,
    pub xtol: f64,
    pub gtol: f64,
    pub ftol: f64,
    pub initial_lambda: f64,
}

impl Default for FitSetup {
    fn default() -> Self {
        FitSetup {
            max_iterations: 100,
            xtol: 1.0e-8,
            gtol: 1.0e-8,
            ftol: 1.0e-10,
            initial_lambda: 1.0e-3,
        }
    }
}

impl FitSetup {
    #[must_use]
    pub fn new() -> Self {
        FitSetup::default()
    }

    #[must_use]
    pub fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }
    #[must_use]
    pub fn opt_max_iterations(self, n: Option<u32>) -> Self {
        match n {
            Some(n) => self.max_iterations(n),
            None => self,
        }
    }

    #[must_use]
    pub fn xtol(mut self, tol: f64) -> Self {
        self.xtol = tol;
        self
    }
    #[must_use]
    pub fn opt_xtol(self, tol: Option<f64>) -> Self {
        match tol {
            Some(tol) => self.xtol(tol),
            None => self,
        }
    }

    #[must_use]
    pub fn gtol(mut self, tol: f64) -> Self {
        self.gtol = tol;
        self
    }
    #[must_use]
    pub fn opt_gtol(self, tol: Option<f64>) -> Self {
        match tol {
            Some(tol) => self.gtol(tol),
            None => self,
        }
    }

    #[must_use]
    pub fn ftol(mut self, tol: f64) -> Self {
        self.ftol = tol;
        self
    }
    #[must_use]
    pub fn opt_ftol(self, tol: Option<f64>) -> Self {
        match tol {
            Some(tol) => self.ftol(tol),
            None => self,
        }
    }

    #[must_use]
    pub fn opt_initial_lambda(mut self, lambda: Option<f64>) -> Self {
        if let Some(lambda) = lambda {
            self.initial_lambda = lambda;
        }
        self
    }

    /// Checks the settings; `None` if any tolerance is negative or not finite, or if the
    /// iteration budget is zero.
    #[must_use]
    pub fn init(self) -> Option<Self> {
        let tolerances_ok = [self.xtol, self.gtol, self.ftol]
            .iter()
            .all(|t| t.is_finite() && *t >= 0.0);
        let lambda_ok = self.initial_lambda.is_finite() && self.initial_lambda > 0.0;
        (tolerances_ok && lambda_ok && self.max_iterations > 0).then_some(self)
    }

    /// Fit the model to `(x, y)`.
    /// # Errors
    /// Every failure mode is returned as a [`FitFailure`]; nothing here panics on bad data.
    pub fn fit(&self, x: &[f64], y: &[f64]) -> Result<Fit, FitFailure> {
        if x.len() != y.len() {
            return Err(FitFailure::MismatchedLengths {
                x: x.len(),
                y: y.len(),
            });
        }
        let n = x.len();
        if n <= NUM_PARAMS {
            return Err(FitFailure::InsufficientSamples {
                got: n,
                needed: NUM_PARAMS + 1,
            });
        }
        if x.iter().chain(y).any(|v| !v.is_finite()) {
            return Err(FitFailure::Degenerate("non-finite sample"));
        }

        // work relative to the window's mean x so the center and offset columns of the
        // jacobian are not nearly parallel
        let x_ref = x.iter().sum::<f64>() / n as f64;
        let xs: Vec<f64> = x.iter().map(|v| v - x_ref).collect();

        let mut params = initial_guess(&xs, y)?;
        let mut cost = sum_sq(&xs, y, params);
        if !cost.is_finite() {
            return Err(FitFailure::Degenerate("objective overflow at initial guess"));
        }

        let mut lambda = self.initial_lambda;
        let mut converged = false;
        let mut n_iterations = 0;
        while n_iterations < self.max_iterations {
            n_iterations += 1;
            let (jtj, jtr) = normal_equations(&xs, y, params);
            if jtj.iter().chain(jtr.iter()).any(|v| !v.is_finite()) {
                return Err(FitFailure::Degenerate("non-finite jacobian"));
            }
            if jtr.amax() <= self.gtol {
                converged = true;
                break;
            }

            let mut accepted = false;
            while lambda <= MAX_LAMBDA {
                let mut damped = jtj;
                for i in 0..NUM_PARAMS {
                    damped[(i, i)] += lambda * jtj[(i, i)].max(MIN_DIAG);
                }
                let Some(chol) = damped.cholesky() else {
                    lambda *= 10.0;
                    continue;
                };
                let delta = chol.solve(&(-jtr));
                let trial = [
                    params[0] + delta[0],
                    params[1] + delta[1],
                    params[2] + delta[2],
                    params[3] + delta[3],
                ];
                let trial_cost = sum_sq(&xs, y, trial);
                if trial_cost.is_finite() && trial_cost <= cost {
                    let small_step = delta
                        .iter()
                        .zip(params)
                        .all(|(d, p)| d.abs() <= self.xtol * (p.abs() + self.xtol));
                    let small_gain = cost - trial_cost <= self.ftol * cost;
                    params = trial;
                    cost = trial_cost;
                    lambda = (lambda / 10.0).max(MIN_LAMBDA);
                    accepted = true;
                    converged = small_step || small_gain;
                    break;
                }
                lambda *= 10.0;
            }
            // no damping gets the cost any lower: we are sitting on the minimum
            if !accepted || converged {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(FitFailure::NotConverged {
                iterations: n_iterations,
            });
        }

        params[2] = params[2].abs();
        if params.iter().any(|p| !p.is_finite()) || params[2] == 0.0 {
            return Err(FitFailure::Degenerate("non-finite parameters"));
        }

        let (jtj, _) = normal_equations(&xs, y, params);
        let dof = (n - NUM_PARAMS) as f64;
        let red_chisq = cost / dof;
        let covariance = jtj
            .try_inverse()
            .ok_or(FitFailure::Degenerate("singular covariance"))?
            * red_chisq;
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(FitFailure::Degenerate("non-finite covariance"));
        }

        let fitted: Vec<f64> = xs.iter().map(|&xi| modified_gauss(xi, params)).collect();
        let band: Vec<f64> = xs
            .iter()
            .map(|&xi| {
                let g = gradient(xi, params);
                (g.transpose() * covariance * g)[(0, 0)].max(0.0).sqrt()
            })
            .collect();
        let param_errs = [
            covariance[(0, 0)].max(0.0).sqrt(),
            covariance[(1, 1)].max(0.0).sqrt(),
            covariance[(2, 2)].max(0.0).sqrt(),
            covariance[(3, 3)].max(0.0).sqrt(),
        ];
        params[1] += x_ref;

        Ok(Fit {
            params,
            param_errs,
            fitted,
            band,
            n_iterations,
            red_chisq,
        })
    }
}

fn sum_sq(x: &[f64], y: &[f64], params: [f64; 4]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = modified_gauss(xi, params) - yi;
            r * r
        })
        .sum()
}

fn normal_equations(x: &[f64], y: &[f64], params: [f64; 4]) -> (Matrix4<f64>, Vector4<f64>) {
    let mut jtj = Matrix4::zeros();
    let mut jtr = Vector4::zeros();
    for (&xi, &yi) in x.iter().zip(y) {
        let g = gradient(xi, params);
        let r = modified_gauss(xi, params) - yi;
        jtj += g * g.transpose();
        jtr += g * r;
    }
    (jtj, jtr)
}

fn initial_guess(x: &[f64], y: &[f64]) -> Result<[f64; 4], FitFailure> {
    let n = x.len();
    let (i_min, y_min) = y
        .iter()
        .copied()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or(FitFailure::Degenerate("empty window"))?;
    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if y_max - y_min <= f64::EPSILON * y_max.abs().max(y_min.abs()).max(1.0) {
        return Err(FitFailure::Degenerate("flat window"));
    }
    let span = (x[n - 1] - x[0]).abs();
    if span == 0.0 {
        return Err(FitFailure::Degenerate("zero-width window"));
    }
    let step = span / (n - 1) as f64;

    let offset = 0.5 * (y[0] + y[n - 1]);
    let mut amplitude = y_min - offset;
    if amplitude >= 0.0 {
        amplitude = y_min - y_max;
    }
    let half_depth = offset + 0.5 * amplitude;
    let below = y.iter().filter(|&&v| v <= half_depth).count();
    // FWHM = 2 sqrt(2 ln 2) sigma
    let sigma = (below as f64 * step / 2.354_820_045).max(step);

    Ok([amplitude, x[i_min], sigma, offset])
}
