#![warn(clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::instrument::{AcquisitionError, Instrument, InstrumentSetup};
use crate::recording;
use crate::scan::Scan;

/// Anything that can produce a fresh scan over `[freq_low, freq_high)`, with detunings reported
/// relative to `freq_base`.
pub trait SampleSource {
    /// # Errors
    /// `AcquisitionError` if the samples cannot be produced.
    fn acquire(&mut self, freq_base: i64, freq_low: i64, freq_high: i64)
        -> Result<Scan, AcquisitionError>;
}

/// The swept control parameter of a Zeeman sweep, i.e. the coil current.
pub trait ControlStepper {
    /// Command a new value. Returns the device's readback when it gives one.
    /// # Errors
    /// `AcquisitionError` if the command cannot be delivered.
    fn step_control_parameter(&mut self, value: f64) -> Result<Option<f64>, AcquisitionError>;
}

impl<T: SampleSource + ?Sized> SampleSource for &mut T {
    fn acquire(
        &mut self,
        freq_base: i64,
        freq_low: i64,
        freq_high: i64,
    ) -> Result<Scan, AcquisitionError> {
        (**self).acquire(freq_base, freq_low, freq_high)
    }
}

impl<T: ControlStepper + ?Sized> ControlStepper for &mut T {
    fn step_control_parameter(&mut self, value: f64) -> Result<Option<f64>, AcquisitionError> {
        (**self).step_control_parameter(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Drive the instruments; optionally keep every scan as a recording in `save_dir`.
    Live { save_dir: Option<PathBuf> },
    Replay(PathBuf),
    /// Replay a recording picked at random from a directory on every acquisition.
    ReplayRandom(PathBuf),
}

impl DataSource {
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, DataSource::Live { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BenchSetup {
    pub freq: InstrumentSetup,
    pub intensity: InstrumentSetup,
    pub power_supply: InstrumentSetup,
}

const FREQ_COMMAND: &str = "FREQ";
const INTENSITY_QUERY: &str = "OUTP?3";
const CURRENT_TOLERANCE: f64 = 1.0e-3;

pub struct ClockInterface {
    freq_inst: Box<dyn Instrument>,
    intensity_inst: Box<dyn Instrument>,
    power_supply_inst: Box<dyn Instrument>,
    tables: BenchSetup,
    source: DataSource,
    warmup: Duration,
    current_command: String,
    rng: StdRng,
}

impl ClockInterface {
    #[must_use]
    pub fn new(
        freq_inst: Box<dyn Instrument>,
        intensity_inst: Box<dyn Instrument>,
        power_supply_inst: Box<dyn Instrument>,
        source: DataSource,
    ) -> Self {
        ClockInterface {
            freq_inst,
            intensity_inst,
            power_supply_inst,
            tables: BenchSetup::default(),
            source,
            warmup: Duration::ZERO,
            current_command: "CH1:CURR ".to_string(),
            rng: StdRng::from_entropy(),
        }
    }

    #[must_use]
    pub fn tables(mut self, tables: BenchSetup) -> Self {
        self.tables = tables;
        self
    }

    #[must_use]
    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    #[must_use]
    pub fn current_command(mut self, command: &str) -> Self {
        self.current_command = command.to_string();
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[must_use]
    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// Configure every instrument and wait out the warmup. Does nothing when replaying.
    /// # Errors
    /// Stops at the first instrument that fails its setup table.
    pub fn setup(&mut self) -> Result<(), AcquisitionError> {
        if !self.source.is_live() {
            return Ok(());
        }
        self.tables.freq.setup_config(self.freq_inst.as_mut())?;
        self.tables.intensity.setup_config(self.intensity_inst.as_mut())?;
        self.tables
            .power_supply
            .setup_config(self.power_supply_inst.as_mut())?;
        if !self.warmup.is_zero() {
            info!("warming up for {:.1} s", self.warmup.as_secs_f32());
            thread::sleep(self.warmup);
        }
        Ok(())
    }

    /// Send the termination tables. Does nothing when replaying.
    pub fn terminate(&mut self) {
        if !self.source.is_live() {
            return;
        }
        self.tables.freq.term_config(self.freq_inst.as_mut());
        self.tables.intensity.term_config(self.intensity_inst.as_mut());
        self.tables
            .power_supply
            .term_config(self.power_supply_inst.as_mut());
    }

    fn live_scan(
        &mut self,
        freq_base: i64,
        freq_low: i64,
        freq_high: i64,
    ) -> Result<Scan, AcquisitionError> {
        let n = usize::try_from(freq_high - freq_low).unwrap_or(0);
        let mut scan = Scan::with_capacity(n);
        debug!("scanning clock over [{freq_low}, {freq_high})");
        for f in freq_low..freq_high {
            self.freq_inst.write(FREQ_COMMAND, &f.to_string())?;
            let reading = self.intensity_inst.query(INTENSITY_QUERY)?;
            let intensity = reading
                .trim()
                .parse::<f64>()
                .map_err(|_| AcquisitionError::BadReading {
                    name: self.intensity_inst.name().to_string(),
                    reading: reading.clone(),
                })?;
            scan.push(f - freq_base, intensity);
        }
        Ok(scan)
    }

    fn replay_scan(
        path: &Path,
        freq_base: i64,
        freq_low: i64,
        freq_high: i64,
    ) -> Result<Scan, AcquisitionError> {
        let recorded = recording::load_scan(path)
            .map_err(|e| AcquisitionError::Recording(e.to_string()))?;
        let (low, high) = (freq_low - freq_base, freq_high - freq_base);
        let start = recorded.position(low);
        // a live scan never contains its own upper bound, so a recording of [low, high) can be
        // replayed with the same request
        let end = recorded.position(high).or_else(|| {
            let s = recorded.samples();
            match s {
                [.., prev, last] if high == 2 * last.detuning - prev.detuning => Some(s.len()),
                _ => None,
            }
        });
        match (start, end) {
            (Some(start), Some(end)) if start <= end => {
                Ok(Scan::new(recorded.samples()[start..end].to_vec()))
            }
            _ => Err(AcquisitionError::Range {
                low,
                high,
                reason: format!("bounds not in recording {}", path.display()),
            }),
        }
    }
}

impl SampleSource for ClockInterface {
    fn acquire(
        &mut self,
        freq_base: i64,
        freq_low: i64,
        freq_high: i64,
    ) -> Result<Scan, AcquisitionError> {
        if freq_low >= freq_high {
            return Err(AcquisitionError::Range {
                low: freq_low - freq_base,
                high: freq_high - freq_base,
                reason: "empty frequency range".to_string(),
            });
        }
        match self.source.clone() {
            DataSource::Live { save_dir } => {
                let scan = self.live_scan(freq_base, freq_low, freq_high)?;
                if let Some(dir) = save_dir {
                    match recording::save_timestamped(&dir, &scan) {
                        Ok(path) => debug!("saved live scan to {}", path.display()),
                        Err(e) => warn!("failed to save live scan: {e}"),
                    }
                }
                Ok(scan)
            }
            DataSource::Replay(path) => Self::replay_scan(&path, freq_base, freq_low, freq_high),
            DataSource::ReplayRandom(dir) => {
                let path = recording::random_recording(&dir, &mut self.rng)
                    .map_err(|e| AcquisitionError::Recording(e.to_string()))?;
                debug!("replaying {}", path.display());
                Self::replay_scan(&path, freq_base, freq_low, freq_high)
            }
        }
    }
}

impl ControlStepper for ClockInterface {
    fn step_control_parameter(&mut self, value: f64) -> Result<Option<f64>, AcquisitionError> {
        if !self.source.is_live() {
            info!("replaying: power supply would be set to {value}");
            return Ok(None);
        }
        let response = self
            .power_supply_inst
            .write_and_verify(&self.current_command, &value.to_string())?;
        let readback = response.trim().parse::<f64>().ok();
        match readback {
            Some(r) if (r - value).abs() > CURRENT_TOLERANCE => warn!(
                "{} reads back {} after being set to {}",
                self.power_supply_inst.name(),
                r,
                value
            ),
            None => warn!(
                "{} returned unparsable current readback '{}'",
                self.power_supply_inst.name(),
                response.trim()
            ),
            Some(_) => {}
        }
        Ok(readback)
    }
}
