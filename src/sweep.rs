#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::analysis::{FreqAnalysis, ScanError};
use crate::clock::{ControlStepper, SampleSource};
use crate::scan::{Resonance, RunMode, RunReport, ScanRecord};

/// Cloneable stop flag, checked between rounds and steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

const STEP_ROUNDING: f64 = 1.0e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepParams {
    pub start: f64,
    pub step: f64,
    pub stop: f64,
}

impl SweepParams {
    /// Number of steps the sweep will take: one per value `start + i * step` below `stop`.
    /// A span that is a whole number of steps up to rounding counts as exactly that many.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn expected_steps(&self) -> usize {
        if !(self.stop > self.start && self.step > 0.0) {
            return 0;
        }
        let n = (self.stop - self.start) / self.step;
        let whole = n.round();
        if (n - whole).abs() <= STEP_ROUNDING * whole.max(1.0) {
            whole as usize
        } else {
            n.ceil() as usize
        }
    }

    fn validate(&self) -> Result<(), ScanError> {
        if !(self.start.is_finite() && self.stop.is_finite()) {
            return Err(ScanError::InvalidSweep("bounds must be finite".into()));
        }
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(ScanError::InvalidSweep(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        Ok(())
    }
}

/// Control-loop state of one Zeeman sweep.
#[derive(Debug, Clone)]
pub struct SweepState {
    pub current: f64,
    pub params: SweepParams,
    pub records: Vec<ScanRecord>,
}

impl SweepState {
    fn new(params: SweepParams) -> Self {
        SweepState {
            current: params.start,
            params,
            records: Vec::new(),
        }
    }

    /// Control value at step `i`, computed from `start` so rounding never accumulates.
    fn value_at(&self, i: usize) -> f64 {
        self.params.start + i as f64 * self.params.step
    }
}

type ProgressFn<'a> = Box<dyn FnMut(usize, usize) + 'a>;

/// Repeats single scans over time or over a swept current.
pub struct Sweeper<'a> {
    cancel: CancelToken,
    settle: Duration,
    max_consecutive_failures: u32,
    on_progress: Option<ProgressFn<'a>>,
    acquisition_failures: u32,
}

impl Default for Sweeper<'_> {
    fn default() -> Self {
        Sweeper {
            cancel: CancelToken::new(),
            settle: Duration::from_millis(500),
            max_consecutive_failures: 3,
            on_progress: None,
            acquisition_failures: 0,
        }
    }
}

impl<'a> Sweeper<'a> {
    #[must_use]
    pub fn new() -> Self {
        Sweeper::default()
    }

    /// Delay after every recorded sweep step.
    #[must_use]
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Consecutive failed acquisitions tolerated before a run is abandoned.
    #[must_use]
    pub fn max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n.max(1);
        self
    }

    #[must_use]
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Called with `(done, expected)` after every round or step.
    #[must_use]
    pub fn on_progress(mut self, f: impl FnMut(usize, usize) + 'a) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn progress(&mut self, mode: RunMode, done: usize, expected: usize) {
        debug!("{mode} progress {done}/{expected}");
        if let Some(f) = self.on_progress.as_mut() {
            f(done, expected);
        }
    }

    /// Sort a scan outcome into success or skip, aborting on faults. Counts consecutive
    /// acquisition failures.
    fn triage(
        &mut self,
        outcome: Result<Resonance, ScanError>,
    ) -> Result<Option<Resonance>, ScanError> {
        match outcome {
            Ok(res) => {
                self.acquisition_failures = 0;
                Ok(Some(res))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(ScanError::Acquisition(e)) => {
                self.acquisition_failures += 1;
                warn!(
                    "acquisition failed ({} in a row): {}",
                    self.acquisition_failures, e
                );
                if self.acquisition_failures >= self.max_consecutive_failures {
                    return Err(ScanError::AcquisitionExhausted {
                        failures: self.acquisition_failures,
                        last: e,
                    });
                }
                Ok(None)
            }
            Err(e) => {
                self.acquisition_failures = 0;
                warn!("{e}");
                Ok(None)
            }
        }
    }

    fn start(&mut self) {
        self.acquisition_failures = 0;
    }

    /// Track drift: `rounds` back-to-back single scans, each success keyed by seconds since
    /// the run started. Failed rounds are skipped.
    /// # Errors
    /// Only faults that would repeat every round: a diagnostic range missing from the scan,
    /// or too many acquisition failures in a row.
    pub fn cont_scan<S: SampleSource>(
        &mut self,
        analysis: &mut FreqAnalysis<S>,
        detune_low: i64,
        detune_high: i64,
        rounds: usize,
    ) -> Result<RunReport, ScanError> {
        self.start();
        let started = Instant::now();
        let mut records = Vec::new();
        let mut cancelled = false;

        for round in 0..rounds {
            if self.cancel.is_cancelled() {
                info!("cont_scan cancelled after {round} of {rounds} rounds");
                cancelled = true;
                break;
            }
            let outcome = analysis.single_scan(detune_low, detune_high);
            match self.triage(outcome)? {
                Some(res) => records.push(ScanRecord {
                    x: started.elapsed().as_secs_f64(),
                    frequency: res.frequency,
                    weight: res.weight,
                }),
                None => info!("round {} skipped", round + 1),
            }
            self.progress(RunMode::ContScan, round + 1, rounds);
        }

        Ok(RunReport {
            mode: RunMode::ContScan,
            records,
            cancelled,
        })
    }

    /// Zeeman sweep: at each current in `[start, stop)` scan once, retrying once on failure,
    /// record `(current, frequency, weight)` on success, then step the supply by `step`. The
    /// supply is stepped whether or not the scan succeeded.
    /// # Errors
    /// Invalid sweep bounds, a diagnostic range missing from the scan, or too many
    /// acquisition failures in a row. Stepper failures are logged, not fatal.
    pub fn zsweep<S: SampleSource + ControlStepper>(
        &mut self,
        analysis: &mut FreqAnalysis<S>,
        detune_low: i64,
        detune_high: i64,
        params: SweepParams,
    ) -> Result<RunReport, ScanError> {
        params.validate()?;
        self.start();
        let expected = params.expected_steps();
        let mut state = SweepState::new(params);
        let mut cancelled = false;

        for i in 0..expected {
            if self.cancel.is_cancelled() {
                info!("zsweep cancelled at {} A", state.current);
                cancelled = true;
                break;
            }
            state.current = state.value_at(i);

            let mut resonance = None;
            for attempt in 0..2 {
                let outcome = analysis.single_scan(detune_low, detune_high);
                resonance = self.triage(outcome)?;
                if resonance.is_some() {
                    break;
                }
                if attempt == 0 {
                    info!("rerunning scan at {} A", state.current);
                }
            }

            match resonance {
                Some(res) => {
                    state.records.push(ScanRecord {
                        x: state.current,
                        frequency: res.frequency,
                        weight: res.weight,
                    });
                    if !self.settle.is_zero() {
                        thread::sleep(self.settle);
                    }
                }
                None => info!("step at {} A skipped", state.current),
            }

            self.progress(RunMode::ZSweep, i + 1, expected);

            let next = state.value_at(i + 1);
            if let Err(e) = analysis.source_mut().step_control_parameter(next) {
                warn!("failed to set current to {next} A: {e}");
            }
        }

        Ok(RunReport {
            mode: RunMode::ZSweep,
            records: state.records,
            cancelled,
        })
    }
}
