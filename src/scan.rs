#![warn(clippy::pedantic)]

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// One lock-in reading. `detuning` is the offset in Hz from the base frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub detuning: i64,
    pub intensity: f64,
}

impl Sample {
    #[must_use]
    pub fn new(detuning: i64, intensity: f64) -> Self {
        Sample {
            detuning,
            intensity,
        }
    }
}

/// An ordered run of samples over a contiguous, increasing detuning range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scan {
    samples: Vec<Sample>,
}

impl Scan {
    #[must_use]
    pub fn new(samples: Vec<Sample>) -> Self {
        Scan { samples }
    }

    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Scan {
            samples: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, detuning: i64, intensity: f64) {
        self.samples.push(Sample::new(detuning, intensity));
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Index of the sample whose detuning is exactly `detuning`.
    #[must_use]
    pub fn position(&self, detuning: i64) -> Option<usize> {
        self.samples.iter().position(|s| s.detuning == detuning)
    }

    /// Index range `[position(low), position(high))`, or `None` if either bound is missing
    /// or the bounds are out of order.
    #[must_use]
    pub fn index_range(&self, low: i64, high: i64) -> Option<Range<usize>> {
        let start = self.position(low)?;
        let end = self.position(high)?;
        (start <= end).then_some(start..end)
    }

    /// Copy of the half-open detuning range `[low, high)`, located by exact value.
    #[must_use]
    pub fn between(&self, low: i64, high: i64) -> Option<Scan> {
        let range = self.index_range(low, high)?;
        Some(Scan::new(self.samples[range].to_vec()))
    }

    #[must_use]
    pub fn detunings(&self) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        self.samples.iter().map(|s| s.detuning as f64).collect()
    }

    #[must_use]
    pub fn intensities(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.intensity).collect()
    }
}

impl FromIterator<Sample> for Scan {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Scan::new(iter.into_iter().collect())
    }
}

/// A fitted resonance: detuning of the fitted minimum and its weight
/// (`|fitted depth| / (2 * fit error)`), a larger weight meaning a better estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resonance {
    pub frequency: f64,
    pub weight: f64,
}

/// One point of a drift-tracking or sweep series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Elapsed seconds (drift tracking) or power supply current (sweep).
    pub x: f64,
    pub frequency: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    ContScan,
    ZSweep,
}

impl RunMode {
    #[must_use]
    pub fn x_label(self) -> &'static str {
        match self {
            RunMode::ContScan => "elapsed time [s]",
            RunMode::ZSweep => "current [A]",
        }
    }

    #[must_use]
    pub fn y_label(self) -> &'static str {
        match self {
            RunMode::ContScan => "detuning frequency [Hz]",
            RunMode::ZSweep => "frequency [Hz]",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::ContScan => write!(f, "cont_scan"),
            RunMode::ZSweep => write!(f, "zsweep"),
        }
    }
}

/// The finished series of a run, handed to the reporting sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub mode: RunMode,
    pub records: Vec<ScanRecord>,
    /// Set when the run was stopped through its cancel token before finishing.
    pub cancelled: bool,
}

impl RunReport {
    #[must_use]
    pub fn xs(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.x).collect()
    }

    #[must_use]
    pub fn frequencies(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.frequency).collect()
    }

    #[must_use]
    pub fn weights(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.weight).collect()
    }

    /// Mean of the frequencies weighted by the record weights; `None` for an empty series
    /// or one whose weights do not sum to a positive finite value.
    #[must_use]
    pub fn weighted_mean_frequency(&self) -> Option<f64> {
        let total: f64 = self.records.iter().map(|r| r.weight).sum();
        if !(total.is_finite() && total > 0.0) {
            return None;
        }
        Some(
            self.records
                .iter()
                .map(|r| r.frequency * r.weight)
                .sum::<f64>()
                / total,
        )
    }
}
