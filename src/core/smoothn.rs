/*!
 * Robust penalized least-squares smoothing of a 1-D series
 *
 * Discrete cosine transform formulation of the penalized least-squares
 * smoother with iterative bisquare reweighting:
 * - the smoothing operator is diagonal in the DCT basis
 * - missing samples (non-finite) get zero weight and are filled
 * - outliers are downweighted by bisquare weights of the studentized residuals
 *
 * Based on:
 * - Garcia, D. (2010). Robust smoothing of gridded data in one and higher
 *   dimensions with missing values. Computational Statistics & Data Analysis
 */

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

/// Bisquare tuning constant
const BISQUARE_C: f64 = 4.685;
/// MAD to standard deviation for Gaussian residuals
const MAD_SCALE: f64 = 1.4826;
/// Over-relaxation used once weights are not all one
const WEIGHTED_RELAXATION: f64 = 1.75;

/// Robust smoother parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothnParams {
    /// Smoothing strength `s`
    pub smoothing: f64,
    /// Downweight outliers with bisquare weights
    pub robust: bool,
    /// Relative change between iterates that counts as converged
    pub tolerance: f64,
    /// Iteration cap per pass
    pub max_iterations: usize,
    /// Passes including the initial unweighted one (robust mode only)
    pub robust_passes: usize,
    /// Treat hitting `max_iterations` in the last pass as an error instead
    /// of returning the last iterate
    pub require_convergence: bool,
}

impl Default for SmoothnParams {
    fn default() -> Self {
        Self {
            smoothing: 0.75,
            robust: true,
            tolerance: 1e-6,
            max_iterations: 100,
            robust_passes: 3,
            require_convergence: false,
        }
    }
}

/// Failure to smooth one series
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SmoothnError {
    #[error("series length {found} does not match smoother length {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("cannot smooth an empty series")]
    Empty,

    #[error("series has no finite value")]
    NoFiniteValues,

    #[error("no convergence after {iterations} iterations (relative change {change:e})")]
    NotConverged { iterations: usize, change: f64 },

    #[error("smoothed value at time step {0} is not finite")]
    NonFinite(usize),
}

/// Result of smoothing one series
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothnFit {
    pub values: Vec<f64>,
    /// Whether the last pass reached the tolerance
    pub converged: bool,
    /// Iterations of the last pass
    pub iterations: usize,
}

/// Orthonormal DCT-II and its inverse for one length, through an FFT of the
/// same length (even/odd reordering)
struct Dct {
    len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    /// exp(-i pi k / 2n)
    twiddles: Vec<Complex<f64>>,
    /// Orthonormal scaling per coefficient
    scales: Vec<f64>,
}

impl Dct {
    fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);

        let n = len as f64;
        let twiddles = (0..len)
            .map(|k| Complex::from_polar(1.0, -PI * k as f64 / (2.0 * n)))
            .collect();
        let scales = (0..len)
            .map(|k| if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() })
            .collect();

        Self {
            len,
            forward,
            inverse,
            twiddles,
            scales,
        }
    }

    fn scratch_len(&self) -> usize {
        self.forward
            .get_inplace_scratch_len()
            .max(self.inverse.get_inplace_scratch_len())
    }

    fn forward(&self, input: &[f64], output: &mut [f64], work: &mut Workspace) {
        let n = self.len;
        let buffer = &mut work.buffer;

        for m in 0..(n + 1) / 2 {
            buffer[m] = Complex::new(input[2 * m], 0.0);
        }
        for m in 0..n / 2 {
            buffer[n - 1 - m] = Complex::new(input[2 * m + 1], 0.0);
        }

        self.forward.process_with_scratch(buffer, &mut work.scratch);

        for k in 0..n {
            output[k] = (buffer[k] * self.twiddles[k]).re * self.scales[k];
        }
    }

    fn inverse(&self, input: &[f64], output: &mut [f64], work: &mut Workspace) {
        let n = self.len;
        let buffer = &mut work.buffer;

        for k in 0..n {
            let y = input[k] / self.scales[k];
            let y_mirror = if k == 0 { 0.0 } else { input[n - k] / self.scales[n - k] };
            buffer[k] = self.twiddles[k].conj() * Complex::new(y, -y_mirror);
        }

        self.inverse.process_with_scratch(buffer, &mut work.scratch);

        let norm = 1.0 / n as f64;
        for m in 0..(n + 1) / 2 {
            output[2 * m] = buffer[m].re * norm;
        }
        for m in 0..n / 2 {
            output[2 * m + 1] = buffer[n - 1 - m].re * norm;
        }
    }
}

/// Per-call buffers
struct Workspace {
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    blend: Vec<f64>,
    coeffs: Vec<f64>,
    smoothed: Vec<f64>,
}

impl Workspace {
    fn new(dct: &Dct) -> Self {
        let n = dct.len;
        Self {
            buffer: vec![Complex::new(0.0, 0.0); n],
            scratch: vec![Complex::new(0.0, 0.0); dct.scratch_len()],
            blend: vec![0.0; n],
            coeffs: vec![0.0; n],
            smoothed: vec![0.0; n],
        }
    }
}

/// Robust smoother for series of one fixed length.
///
/// Holds the FFT plans and the eigenvalues of the smoothing operator, so one
/// instance can be shared by every pixel of a cube.
pub struct RobustSmoother {
    params: SmoothnParams,
    dct: Dct,
    /// 1 / (1 + s * lambda^2) per DCT coefficient
    gamma: Vec<f64>,
    /// Average leverage for the bisquare studentization
    leverage: f64,
}

impl std::fmt::Debug for RobustSmoother {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustSmoother")
            .field("len", &self.dct.len)
            .field("params", &self.params)
            .finish()
    }
}

impl RobustSmoother {
    pub fn new(len: usize, params: SmoothnParams) -> Result<Self, SmoothnError> {
        if len == 0 {
            return Err(SmoothnError::Empty);
        }

        let n = len as f64;
        let s = params.smoothing;
        let gamma = (0..len)
            .map(|k| {
                let lambda = -2.0 + 2.0 * (PI * k as f64 / n).cos();
                1.0 / (1.0 + s * lambda * lambda)
            })
            .collect();

        let h = (1.0 + 16.0 * s).sqrt();
        let leverage = (1.0 + h).sqrt() / 2f64.sqrt() / h;

        Ok(Self {
            params,
            dct: Dct::new(len),
            gamma,
            leverage,
        })
    }

    pub fn len(&self) -> usize {
        self.dct.len
    }

    pub fn params(&self) -> &SmoothnParams {
        &self.params
    }

    /// Smooth one series.
    ///
    /// Non-finite samples are treated as missing. When the last pass does
    /// not reach the tolerance within the iteration cap the last iterate is
    /// returned with `converged == false`, unless convergence is required.
    pub fn smooth(&self, y: &[f64]) -> Result<SmoothnFit, SmoothnError> {
        let n = self.len();
        if y.len() != n {
            return Err(SmoothnError::LengthMismatch {
                expected: n,
                found: y.len(),
            });
        }

        let finite: Vec<bool> = y.iter().map(|v| v.is_finite()).collect();
        let n_finite = finite.iter().filter(|&&f| f).count();
        if n_finite == 0 {
            return Err(SmoothnError::NoFiniteValues);
        }

        let mut work = Workspace::new(&self.dct);
        let weights: Vec<f64> = finite.iter().map(|&f| if f { 1.0 } else { 0.0 }).collect();
        let observed: Vec<f64> = y.iter().map(|&v| if v.is_finite() { v } else { 0.0 }).collect();
        let mut weighted = n_finite < n;

        let mut z = if weighted {
            self.initial_guess(y, &finite, &mut work)
        } else {
            vec![0.0; n]
        };
        let mut z_prev = z.clone();
        let mut total_weights = weights.clone();

        let passes = if self.params.robust {
            self.params.robust_passes.max(1)
        } else {
            1
        };

        let mut change = f64::INFINITY;
        let mut iterations = 0;

        for pass in 0..passes {
            let relaxation = if weighted { WEIGHTED_RELAXATION } else { 1.0 };
            change = f64::INFINITY;
            iterations = 0;

            while change > self.params.tolerance && iterations < self.params.max_iterations {
                iterations += 1;

                for i in 0..n {
                    work.blend[i] = total_weights[i] * (observed[i] - z[i]) + z[i];
                }

                let blend = std::mem::take(&mut work.blend);
                let mut coeffs = std::mem::take(&mut work.coeffs);
                self.dct.forward(&blend, &mut coeffs, &mut work);
                for (c, g) in coeffs.iter_mut().zip(&self.gamma) {
                    *c *= g;
                }
                let mut smoothed = std::mem::take(&mut work.smoothed);
                self.dct.inverse(&coeffs, &mut smoothed, &mut work);

                for i in 0..n {
                    z[i] = relaxation * smoothed[i] + (1.0 - relaxation) * z[i];
                }

                work.blend = blend;
                work.coeffs = coeffs;
                work.smoothed = smoothed;

                // An unweighted pass is solved exactly in one step
                change = if weighted { relative_change(&z_prev, &z) } else { 0.0 };
                z_prev.copy_from_slice(&z);
            }

            if pass + 1 < passes {
                let robust = self.bisquare_weights(&observed, &z, &finite);
                for i in 0..n {
                    total_weights[i] = weights[i] * robust[i];
                }
                weighted = true;
            }
        }

        let converged = change <= self.params.tolerance;
        if !converged && self.params.require_convergence {
            return Err(SmoothnError::NotConverged { iterations, change });
        }

        if let Some(i) = z.iter().position(|v| !v.is_finite()) {
            return Err(SmoothnError::NonFinite(i));
        }

        Ok(SmoothnFit {
            values: z,
            converged,
            iterations,
        })
    }

    /// Nearest-neighbour fill of missing samples followed by a low-pass DCT
    /// keeping the first tenth of the coefficients
    fn initial_guess(&self, y: &[f64], finite: &[bool], work: &mut Workspace) -> Vec<f64> {
        let n = y.len();
        let filled: Vec<f64> = (0..n)
            .map(|i| if finite[i] { y[i] } else { y[nearest_finite(finite, i)] })
            .collect();

        let mut coeffs = vec![0.0; n];
        self.dct.forward(&filled, &mut coeffs, work);

        let keep = (n as f64 / 10.0).ceil() as usize;
        for c in coeffs.iter_mut().skip(keep) {
            *c = 0.0;
        }

        let mut guess = vec![0.0; n];
        self.dct.inverse(&coeffs, &mut guess, work);
        guess
    }

    /// Bisquare weights of the studentized residuals
    fn bisquare_weights(&self, observed: &[f64], z: &[f64], finite: &[bool]) -> Vec<f64> {
        let residuals: Vec<f64> = observed.iter().zip(z).map(|(y, z)| y - z).collect();

        let mut valid: Vec<f64> = residuals
            .iter()
            .zip(finite)
            .filter(|(_, &f)| f)
            .map(|(&r, _)| r)
            .collect();
        let center = median(&mut valid);
        let mut deviations: Vec<f64> = valid.iter().map(|r| (r - center).abs()).collect();
        let mad = median(&mut deviations);

        // All residuals equal: nothing stands out
        if !(mad > 0.0) {
            return finite.iter().map(|&f| if f { 1.0 } else { 0.0 }).collect();
        }

        let scale = MAD_SCALE * mad * (1.0 - self.leverage).sqrt();
        residuals
            .iter()
            .zip(finite)
            .map(|(r, &f)| {
                let u = (r / scale).abs() / BISQUARE_C;
                if f && u < 1.0 {
                    (1.0 - u * u).powi(2)
                } else {
                    0.0
                }
            })
            .collect()
    }
}

fn relative_change(previous: &[f64], current: &[f64]) -> f64 {
    let diff = previous
        .iter()
        .zip(current)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    let norm = current.iter().map(|v| v * v).sum::<f64>().sqrt();

    if norm > 0.0 {
        diff / norm
    } else {
        diff
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Index of the closest finite sample, preferring the earlier one on ties
fn nearest_finite(finite: &[bool], i: usize) -> usize {
    for d in 1..finite.len() {
        if i >= d && finite[i - d] {
            return i - d;
        }
        if i + d < finite.len() && finite[i + d] {
            return i + d;
        }
    }
    i
}
