#![warn(clippy::pedantic)]

use log::debug;
use thiserror::Error;

use crate::clock::SampleSource;
use crate::instrument::AcquisitionError;
use crate::multifit::{FitFailure, FitSetup};
use crate::peak::{DiagnosticRange, RangeError};
use crate::scan::Resonance;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanError {
    #[error("acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),
    #[error("fit failed: {0}")]
    Fit(#[from] FitFailure),
    #[error("configuration fault: {0}")]
    Range(#[from] RangeError),
    #[error("giving up after {failures} consecutive acquisition failures; last: {last}")]
    AcquisitionExhausted {
        failures: u32,
        last: AcquisitionError,
    },
    #[error("invalid sweep: {0}")]
    InvalidSweep(String),
}

impl ScanError {
    /// Faults that would recur on every scan with the same settings; a run stops on these.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::Range(_) | ScanError::AcquisitionExhausted { .. } | ScanError::InvalidSweep(_)
        )
    }
}

/// Everything a plot of one scan needs: the fitted window and the resulting estimate.
#[derive(Debug, Clone)]
pub struct ScanDiagnostics {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub fitted: Vec<f64>,
    pub band: Vec<f64>,
    pub resonance: Resonance,
}

/// Turns one acquisition into one resonance estimate. Holds no state between scans
/// besides its settings and the sample source.
pub struct FreqAnalysis<S> {
    source: S,
    freq_base: i64,
    diagnostic: DiagnosticRange,
    fit_setup: FitSetup,
}

impl<S: SampleSource> FreqAnalysis<S> {
    #[must_use]
    pub fn new(source: S, freq_base: i64) -> Self {
        FreqAnalysis {
            source,
            freq_base,
            diagnostic: DiagnosticRange::default(),
            fit_setup: FitSetup::default(),
        }
    }

    #[must_use]
    pub fn diagnostic(mut self, diagnostic: DiagnosticRange) -> Self {
        self.diagnostic = diagnostic;
        self
    }

    #[must_use]
    pub fn fit_setup(mut self, fit_setup: FitSetup) -> Self {
        self.fit_setup = fit_setup;
        self
    }

    #[inline]
    #[must_use]
    pub fn freq_base(&self) -> i64 {
        self.freq_base
    }

    #[inline]
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    #[inline]
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Scan `[base + detune_low, base + detune_high)` once and fit the dip found inside the
    /// diagnostic range.
    /// # Errors
    /// See [`ScanError`]; only `Range` means the settings themselves are wrong.
    pub fn single_scan(&mut self, detune_low: i64, detune_high: i64) -> Result<Resonance, ScanError> {
        self.single_scan_diagnostics(detune_low, detune_high)
            .map(|d| d.resonance)
    }

    /// As [`single_scan`](Self::single_scan), keeping the window and fitted curve.
    /// # Errors
    /// See [`ScanError`].
    pub fn single_scan_diagnostics(
        &mut self,
        detune_low: i64,
        detune_high: i64,
    ) -> Result<ScanDiagnostics, ScanError> {
        let scan = self.source.acquire(
            self.freq_base,
            self.freq_base + detune_low,
            self.freq_base + detune_high,
        )?;
        let window = self.diagnostic.locate(&scan)?;
        let (x, y) = (window.x(), window.y());
        let fit = self.fit_setup.fit(&x, &y)?;
        let resonance = fit.resonance(&x)?;
        debug!(
            "fit converged in {} iterations: center {:.2}, resonance {} (weight {:.3})",
            fit.n_iterations,
            fit.center(),
            resonance.frequency,
            resonance.weight
        );
        Ok(ScanDiagnostics {
            x,
            y,
            fitted: fit.fitted,
            band: fit.band,
            resonance,
        })
    }
}
