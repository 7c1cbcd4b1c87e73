#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

//! Settings loaded from the TOML config file. A section named after the host overrides keys of
//! `[general]`, so one file can serve every bench machine.

use std::fs::read_to_string;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use gethostname::gethostname;
use log::info;
use thiserror::Error;

use crate::clock::{BenchSetup, DataSource};
use crate::instrument::mock::SimulationSettings;
use crate::instrument::InstrumentSetup;
use crate::multifit::FitSetup;
use crate::peak::DiagnosticRange;
use crate::sweep::{SweepParams, Sweeper};
use crate::util::{find_file, tomlget, tomlget_opt, tomlget_or};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} not found", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing {section}:{key} in config")]
    Missing { section: String, key: String },
    #[error("failed to convert {section}:{key} to {expected}")]
    Type {
        section: String,
        key: String,
        expected: &'static str,
    },
    #[error("invalid {section}:{key}: {reason}")]
    Invalid {
        section: String,
        key: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Numeric keys accept either TOML integers or floats.
trait AsNumber {
    fn as_number(&self) -> Option<f64>;
}

impl AsNumber for toml::Value {
    fn as_number(&self) -> Option<f64> {
        match self {
            toml::Value::Float(f) => Some(*f),
            toml::Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Single,
    ContScan,
    ZSweep,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Mode::Single),
            "cont_scan" => Ok(Mode::ContScan),
            "zsweep" => Ok(Mode::ZSweep),
            other => Err(format!(
                "unknown mode '{other}'; expected single, cont_scan or zsweep"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct General {
    pub mocking: bool,
    pub mock_rand: bool,
    pub mock_save: bool,
    pub mock_dir: PathBuf,
    pub mocking_file: Option<PathBuf>,
    pub warmup: Duration,
    pub mode: Mode,
    pub results_file: Option<PathBuf>,
    pub publish_port: Option<u16>,
}

impl General {
    /// Where scans come from, per the `mocking` flags.
    pub fn data_source(&self) -> Result<DataSource, ConfigError> {
        if !self.mocking {
            return Ok(DataSource::Live {
                save_dir: self.mock_save.then(|| self.mock_dir.clone()),
            });
        }
        if self.mock_rand {
            return Ok(DataSource::ReplayRandom(self.mock_dir.clone()));
        }
        self.mocking_file
            .clone()
            .map(DataSource::Replay)
            .ok_or_else(|| ConfigError::Missing {
                section: "general".to_string(),
                key: "mocking_file".to_string(),
            })
    }
}

/// The scanned frequency band and where to look for the dip inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanBand {
    pub freq_base: i64,
    pub detune_low: i64,
    pub detune_high: i64,
    pub diagnostic: DiagnosticRange,
}

/// Read and parse `path`, found as described in [`find_file`], with this host's section
/// merged over `[general]`.
pub fn load_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let found = find_file(path).ok_or_else(|| ConfigError::NotFound(path.to_path_buf()))?;
    info!("Reading config file {}", found.display());
    let text = read_to_string(&found).map_err(|source| ConfigError::Io {
        path: found.clone(),
        source,
    })?;
    let cfg = toml::from_str(&text)?;
    Ok(merge_host_section(cfg, &gethostname().to_string_lossy()))
}

/// Copy every key of `[hostname]` into `[general]`, replacing what is there.
#[must_use]
pub fn merge_host_section(mut cfg: toml::Value, hostname: &str) -> toml::Value {
    let Some(host) = cfg.get(hostname).and_then(toml::Value::as_table).cloned() else {
        return cfg;
    };
    if let Some(root) = cfg.as_table_mut() {
        let general = root
            .entry("general")
            .or_insert(toml::Value::Table(toml::map::Map::new()));
        if let Some(general) = general.as_table_mut() {
            info!("applying overrides from section [{hostname}]");
            for (key, val) in host {
                general.insert(key, val);
            }
        }
    }
    cfg
}

pub fn general_from_config(cfg: &toml::Value) -> Result<General, ConfigError> {
    let mode = tomlget_or!(cfg, "general", "mode", as_str, "single");
    let publish_port = match tomlget_opt!(cfg, "general", "publish_port", as_integer, i64) {
        Some(port) => Some(
            u16::try_from(port)
                .map_err(|_| ConfigError::invalid("general", "publish_port", "not a port"))?,
        ),
        None => None,
    };
    let warmup = tomlget_or!(cfg, "general", "warmup_time_s", as_number, f64, 10.0);
    if !(warmup.is_finite() && warmup >= 0.0) {
        return Err(ConfigError::invalid(
            "general",
            "warmup_time_s",
            "must be a non-negative number of seconds",
        ));
    }
    Ok(General {
        mocking: tomlget_or!(cfg, "general", "mocking", as_bool, false),
        mock_rand: tomlget_or!(cfg, "general", "mock_rand", as_bool, false),
        mock_save: tomlget_or!(cfg, "general", "mock_save", as_bool, false),
        mock_dir: tomlget_or!(cfg, "general", "mock_dir", as_str, "./mock_data/").into(),
        mocking_file: tomlget_opt!(cfg, "general", "mocking_file", as_str).map(PathBuf::from),
        warmup: Duration::from_secs_f64(warmup),
        mode: mode
            .parse::<Mode>()
            .map_err(|e| ConfigError::invalid("general", "mode", e))?,
        results_file: tomlget_opt!(cfg, "general", "results_file", as_str).map(PathBuf::from),
        publish_port,
    })
}

pub fn scan_band_from_config(cfg: &toml::Value) -> Result<ScanBand, ConfigError> {
    let detune_low = tomlget_or!(cfg, "scan", "detune_low", as_integer, i64, 8000);
    let detune_high = tomlget_or!(cfg, "scan", "detune_high", as_integer, i64, 8400);
    if detune_low >= detune_high {
        return Err(ConfigError::invalid(
            "scan",
            "detune_high",
            format!("must exceed detune_low ({detune_low})"),
        ));
    }
    let diagnostic = DiagnosticRange {
        low: tomlget_or!(cfg, "scan", "diag_low", as_integer, i64, 8150),
        high: tomlget_or!(cfg, "scan", "diag_high", as_integer, i64, 8300),
        half_width: usize::try_from(tomlget_or!(cfg, "scan", "half_width", as_integer, i64, 20))
            .map_err(|_| ConfigError::invalid("scan", "half_width", "must not be negative"))?,
    };
    if diagnostic.low >= diagnostic.high {
        return Err(ConfigError::invalid(
            "scan",
            "diag_high",
            format!("must exceed diag_low ({})", diagnostic.low),
        ));
    }
    Ok(ScanBand {
        freq_base: tomlget_or!(cfg, "scan", "freq_base", as_integer, i64, 6_834_682_610),
        detune_low,
        detune_high,
        diagnostic,
    })
}

pub fn multifit_from_config(cfg: &toml::Value) -> Result<FitSetup, ConfigError> {
    let max_iterations = tomlget_opt!(cfg, "multifit", "max_iterations", as_integer, i64)
        .map(u32::try_from)
        .transpose()
        .map_err(|_| ConfigError::invalid("multifit", "max_iterations", "must not be negative"))?;
    FitSetup::new()
        .opt_max_iterations(max_iterations)
        .opt_xtol(tomlget_opt!(cfg, "multifit", "xtol", as_number, f64))
        .opt_gtol(tomlget_opt!(cfg, "multifit", "gtol", as_number, f64))
        .opt_ftol(tomlget_opt!(cfg, "multifit", "ftol", as_number, f64))
        .opt_initial_lambda(tomlget_opt!(cfg, "multifit", "initial_lambda", as_number, f64))
        .init()
        .ok_or_else(|| {
            ConfigError::invalid("multifit", "*", "tolerances and iteration budget out of range")
        })
}

pub fn rounds_from_config(cfg: &toml::Value) -> Result<usize, ConfigError> {
    usize::try_from(tomlget_or!(cfg, "cont_scan", "rounds", as_integer, i64, 5))
        .map_err(|_| ConfigError::invalid("cont_scan", "rounds", "must not be negative"))
}

/// Sweep bounds are required when the config asks for a Zeeman sweep.
pub fn sweep_params_from_config(cfg: &toml::Value) -> Result<SweepParams, ConfigError> {
    let params = SweepParams {
        start: tomlget!(cfg, "zsweep", "start", as_number, f64),
        step: tomlget!(cfg, "zsweep", "step", as_number, f64),
        stop: tomlget!(cfg, "zsweep", "stop", as_number, f64),
    };
    if !(params.step.is_finite() && params.step > 0.0) {
        return Err(ConfigError::invalid("zsweep", "step", "must be positive"));
    }
    Ok(params)
}

pub fn sweeper_from_config<'a>(cfg: &toml::Value) -> Result<Sweeper<'a>, ConfigError> {
    let settle_ms = tomlget_or!(cfg, "zsweep", "settle_time_ms", as_integer, i64, 500);
    let settle = u64::try_from(settle_ms)
        .map_err(|_| ConfigError::invalid("zsweep", "settle_time_ms", "must not be negative"))?;
    let max_failures = tomlget_or!(cfg, "zsweep", "max_consecutive_failures", as_integer, i64, 3);
    let max_failures = u32::try_from(max_failures).map_err(|_| {
        ConfigError::invalid("zsweep", "max_consecutive_failures", "must not be negative")
    })?;
    Ok(Sweeper::new()
        .settle(Duration::from_millis(settle))
        .max_consecutive_failures(max_failures))
}

/// One row of a command table: `["COMMAND", value]`. Numeric values are sent as written.
fn command_pair(section: &str, key: &str, row: &toml::Value) -> Result<(String, String), ConfigError> {
    let bad = || ConfigError::Type {
        section: section.to_string(),
        key: key.to_string(),
        expected: "array of [command, value] pairs",
    };
    let pair = row.as_array().filter(|p| p.len() == 2).ok_or_else(bad)?;
    let command = pair[0].as_str().ok_or_else(bad)?.to_string();
    let value = match &pair[1] {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        _ => return Err(bad()),
    };
    Ok((command, value))
}

fn command_table(
    cfg: &toml::Value,
    name: &str,
    key: &str,
) -> Result<Vec<(String, String)>, ConfigError> {
    let section = format!("instruments.{name}");
    match cfg
        .get("instruments")
        .and_then(|i| i.get(name))
        .and_then(|i| i.get(key))
    {
        Some(rows) => rows
            .as_array()
            .ok_or_else(|| ConfigError::Type {
                section: section.clone(),
                key: key.to_string(),
                expected: "array of [command, value] pairs",
            })?
            .iter()
            .map(|row| command_pair(&section, key, row))
            .collect(),
        None => Ok(Vec::new()),
    }
}

fn instrument_setup_from_config(
    cfg: &toml::Value,
    name: &str,
) -> Result<InstrumentSetup, ConfigError> {
    Ok(InstrumentSetup {
        setup: command_table(cfg, name, "setup")?,
        term: command_table(cfg, name, "term")?,
    })
}

/// Instrument display name from `[instruments.<role>] name`, or `default`.
pub fn instrument_name(cfg: &toml::Value, role: &str, default: &str) -> String {
    cfg.get("instruments")
        .and_then(|i| i.get(role))
        .and_then(|i| i.get("name"))
        .and_then(toml::Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Setup and termination tables of `[instruments.generator]`, `[instruments.lock_in]` and
/// `[instruments.power_supply]`. A missing table is empty.
pub fn bench_setup_from_config(cfg: &toml::Value) -> Result<BenchSetup, ConfigError> {
    Ok(BenchSetup {
        freq: instrument_setup_from_config(cfg, "generator")?,
        intensity: instrument_setup_from_config(cfg, "lock_in")?,
        power_supply: instrument_setup_from_config(cfg, "power_supply")?,
    })
}

pub fn simulation_from_config(
    cfg: &toml::Value,
    freq_base: i64,
) -> Result<SimulationSettings, ConfigError> {
    let d = SimulationSettings::default();
    Ok(SimulationSettings {
        freq_base,
        center: tomlget_or!(cfg, "simulation", "center", as_number, f64, d.center),
        width: tomlget_or!(cfg, "simulation", "width", as_number, f64, d.width),
        depth: tomlget_or!(cfg, "simulation", "depth", as_number, f64, d.depth),
        baseline: tomlget_or!(cfg, "simulation", "baseline", as_number, f64, d.baseline),
        noise: tomlget_or!(cfg, "simulation", "noise", as_number, f64, d.noise),
        zeeman_slope: tomlget_or!(cfg, "simulation", "zeeman_slope", as_number, f64, d.zeeman_slope),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[general]
mocking = true
mock_rand = false
mocking_file = "./mock_data/run.csv"
warmup_time_s = 2
mode = "zsweep"
publish_port = 8080

[scan]
freq_base = 6834682610
detune_low = 8000
detune_high = 8400
half_width = 15

[multifit]
max_iterations = 50
xtol = 1e-6

[zsweep]
start = 0
step = 0.5
stop = 2.0
settle_time_ms = 0

[instruments.generator]
name = "SG386"
setup = [["ENBH", 1], ["TYPE", 3], ["AMPH", -10]]
term = [["ENBH", 0]]

[instruments.power_supply]
setup = [["CH1:VOLT ", 1], ["OUTP CH1,", "ON"]]

[bench-7]
mocking = false
mock_save = true
"#;

    fn cfg() -> toml::Value {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn general_section() {
        let general = general_from_config(&cfg()).unwrap();
        assert!(general.mocking);
        assert_eq!(general.mode, Mode::ZSweep);
        assert_eq!(general.warmup, Duration::from_secs(2));
        assert_eq!(general.publish_port, Some(8080));
        assert_eq!(general.results_file, None);
        assert_eq!(
            general.data_source().unwrap(),
            DataSource::Replay(PathBuf::from("./mock_data/run.csv"))
        );
    }

    #[test]
    fn host_section_overrides_general() {
        let merged = merge_host_section(cfg(), "bench-7");
        let general = general_from_config(&merged).unwrap();
        assert!(!general.mocking);
        assert_eq!(general.mode, Mode::ZSweep);
        assert_eq!(
            general.data_source().unwrap(),
            DataSource::Live {
                save_dir: Some(PathBuf::from("./mock_data/"))
            }
        );

        let untouched = merge_host_section(cfg(), "some-other-host");
        assert!(general_from_config(&untouched).unwrap().mocking);
    }

    #[test]
    fn defaults_when_sections_are_missing() {
        let empty: toml::Value = toml::from_str("").unwrap();
        let general = general_from_config(&empty).unwrap();
        assert_eq!(general.mode, Mode::Single);
        assert_eq!(general.warmup, Duration::from_secs(10));
        assert_eq!(general.data_source().unwrap(), DataSource::Live { save_dir: None });

        let band = scan_band_from_config(&empty).unwrap();
        assert_eq!(band.freq_base, 6_834_682_610);
        assert_eq!((band.detune_low, band.detune_high), (8000, 8400));
        assert_eq!(band.diagnostic, DiagnosticRange::default());

        assert_eq!(multifit_from_config(&empty).unwrap(), FitSetup::default());
        assert_eq!(rounds_from_config(&empty).unwrap(), 5);
        assert_eq!(bench_setup_from_config(&empty).unwrap(), BenchSetup::default());
        assert!(matches!(
            sweep_params_from_config(&empty),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn numeric_sections() {
        let cfg = cfg();
        let band = scan_band_from_config(&cfg).unwrap();
        assert_eq!(band.diagnostic.half_width, 15);

        let fit = multifit_from_config(&cfg).unwrap();
        assert_eq!(fit.max_iterations, 50);
        assert!((fit.xtol - 1e-6).abs() < 1e-18);

        let params = sweep_params_from_config(&cfg).unwrap();
        assert_eq!(
            params,
            SweepParams {
                start: 0.0,
                step: 0.5,
                stop: 2.0
            }
        );
        assert_eq!(params.expected_steps(), 4);
    }

    #[test]
    fn command_tables() {
        let bench = bench_setup_from_config(&cfg()).unwrap();
        assert_eq!(bench.freq.setup.len(), 3);
        assert_eq!(bench.freq.setup[2], ("AMPH".to_string(), "-10".to_string()));
        assert_eq!(bench.freq.term, vec![("ENBH".to_string(), "0".to_string())]);
        assert_eq!(
            bench.power_supply.setup[1],
            ("OUTP CH1,".to_string(), "ON".to_string())
        );
        assert!(bench.intensity.setup.is_empty());
        assert_eq!(instrument_name(&cfg(), "generator", "generator"), "SG386");
        assert_eq!(instrument_name(&cfg(), "lock_in", "SR830"), "SR830");
    }

    #[test]
    fn malformed_values_are_errors() {
        let bad: toml::Value = toml::from_str("[general]\nmocking = \"yes\"\n").unwrap();
        assert!(matches!(
            general_from_config(&bad),
            Err(ConfigError::Type { .. })
        ));

        let bad: toml::Value = toml::from_str("[general]\nmode = \"sometimes\"\n").unwrap();
        assert!(matches!(
            general_from_config(&bad),
            Err(ConfigError::Invalid { .. })
        ));

        let bad: toml::Value = toml::from_str("[scan]\ndetune_low = 8400\ndetune_high = 8000\n").unwrap();
        assert!(scan_band_from_config(&bad).is_err());

        let bad: toml::Value =
            toml::from_str("[instruments.lock_in]\nsetup = [[\"SENS\"]]\n").unwrap();
        assert!(bench_setup_from_config(&bad).is_err());

        let bad: toml::Value = toml::from_str("[multifit]\nxtol = -1.0\n").unwrap();
        assert!(multifit_from_config(&bad).is_err());

        let bad: toml::Value = toml::from_str("[zsweep]\nstart = 0\nstep = 0\nstop = 1\n").unwrap();
        assert!(sweep_params_from_config(&bad).is_err());
    }

    #[test]
    fn negative_counts_are_rejected() {
        let bad: toml::Value = toml::from_str("[multifit]\nmax_iterations = -1\n").unwrap();
        assert!(matches!(
            multifit_from_config(&bad),
            Err(ConfigError::Invalid { .. })
        ));

        let bad: toml::Value =
            toml::from_str("[zsweep]\nmax_consecutive_failures = -1\n").unwrap();
        assert!(matches!(
            sweeper_from_config(&bad),
            Err(ConfigError::Invalid { .. })
        ));

        let bad: toml::Value = toml::from_str("[cont_scan]\nrounds = -3\n").unwrap();
        assert!(matches!(
            rounds_from_config(&bad),
            Err(ConfigError::Invalid { .. })
        ));

        let ok: toml::Value = toml::from_str("[multifit]\nmax_iterations = 40\n").unwrap();
        assert!(multifit_from_config(&ok).is_ok());
    }

    #[test]
    fn random_replay_needs_no_file() {
        let cfg: toml::Value =
            toml::from_str("[general]\nmocking = true\nmock_rand = true\nmock_dir = \"recs\"\n")
                .unwrap();
        let general = general_from_config(&cfg).unwrap();
        assert_eq!(
            general.data_source().unwrap(),
            DataSource::ReplayRandom(PathBuf::from("recs"))
        );

        let cfg: toml::Value = toml::from_str("[general]\nmocking = true\n").unwrap();
        assert!(general_from_config(&cfg).unwrap().data_source().is_err());
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(matches!(load_config(&path), Err(ConfigError::NotFound(_))));

        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(cfg.get("zsweep").is_some());
    }
}
