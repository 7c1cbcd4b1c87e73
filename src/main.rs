#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;

use log::{error, info, warn};

use clockscan::analysis::FreqAnalysis;
use clockscan::clock::ClockInterface;
use clockscan::communications::{CsvReport, LogReport, Report, ZmqReport};
use clockscan::configs::{self, General, Mode};
use clockscan::instrument::mock::{Role, SimulatedBench};
use clockscan::logging;
use clockscan::scan::RunReport;

fn main() {
    logging::init();

    let cfg_path = env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("config.toml"), PathBuf::from);
    let cfg = configs::load_config(&cfg_path).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(2);
    });

    if let Err(e) = run(&cfg) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(cfg: &toml::Value) -> Result<(), Box<dyn Error>> {
    let general = configs::general_from_config(cfg)?;
    let band = configs::scan_band_from_config(cfg)?;
    let fit_setup = configs::multifit_from_config(cfg)?;
    let source = general.data_source()?;
    let simulation = configs::simulation_from_config(cfg, band.freq_base)?;

    if source.is_live() {
        warn!("no hardware backend attached; driving the simulated bench");
    }
    let bench = SimulatedBench::new(simulation, None);
    let clock = ClockInterface::new(
        Box::new(bench.instrument(
            Role::Generator,
            &configs::instrument_name(cfg, "generator", "SG386"),
        )),
        Box::new(bench.instrument(
            Role::LockIn,
            &configs::instrument_name(cfg, "lock_in", "SR830"),
        )),
        Box::new(bench.instrument(
            Role::PowerSupply,
            &configs::instrument_name(cfg, "power_supply", "SPD3303X"),
        )),
        source,
    )
    .tables(configs::bench_setup_from_config(cfg)?)
    .warmup(general.warmup);

    let mut analysis = FreqAnalysis::new(clock, band.freq_base)
        .diagnostic(band.diagnostic)
        .fit_setup(fit_setup);

    // PUB drops messages sent before a subscriber connects, so bind ahead of setup
    let publisher = general.publish_port.and_then(|port| match ZmqReport::bind(port) {
        Ok(sock) => {
            info!("publishing results on port {}", sock.port());
            Some(sock)
        }
        Err(e) => {
            warn!("not publishing results: {e}");
            None
        }
    });

    analysis.source_mut().setup()?;
    let outcome = run_mode(cfg, &general, &mut analysis, band.detune_low, band.detune_high);
    analysis.source_mut().terminate();

    if let Some(run) = outcome? {
        report(&general, &run, publisher);
    }
    Ok(())
}

fn run_mode(
    cfg: &toml::Value,
    general: &General,
    analysis: &mut FreqAnalysis<ClockInterface>,
    detune_low: i64,
    detune_high: i64,
) -> Result<Option<RunReport>, Box<dyn Error>> {
    match general.mode {
        Mode::Single => {
            let diag = analysis.single_scan_diagnostics(detune_low, detune_high)?;
            info!(
                "resonance at {} Hz detuning ({} Hz absolute), weight {:.3}, window [{}, {}]",
                diag.resonance.frequency,
                analysis.freq_base() as f64 + diag.resonance.frequency,
                diag.resonance.weight,
                diag.x.first().copied().unwrap_or(f64::NAN),
                diag.x.last().copied().unwrap_or(f64::NAN),
            );
            Ok(None)
        }
        Mode::ContScan => {
            let rounds = configs::rounds_from_config(cfg)?;
            let mut sweeper = configs::sweeper_from_config(cfg)?
                .on_progress(|done, expected| info!("round {done} of {expected} done"));
            Ok(Some(sweeper.cont_scan(analysis, detune_low, detune_high, rounds)?))
        }
        Mode::ZSweep => {
            let params = configs::sweep_params_from_config(cfg)?;
            let mut sweeper = configs::sweeper_from_config(cfg)?
                .on_progress(|done, expected| info!("step {done} of {expected} done"));
            Ok(Some(sweeper.zsweep(analysis, detune_low, detune_high, params)?))
        }
    }
}

fn report(general: &General, run: &RunReport, publisher: Option<ZmqReport>) {
    let mut sinks: Vec<Box<dyn Report>> = vec![Box::new(LogReport)];
    if let Some(path) = &general.results_file {
        sinks.push(Box::new(CsvReport::new(path)));
    }
    if let Some(sock) = publisher {
        sinks.push(Box::new(sock));
    }
    for sink in &mut sinks {
        if let Err(e) = sink.report(run) {
            warn!("failed to report results: {e}");
        }
    }
}
