use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;

use clockscan::analysis::FreqAnalysis;
use clockscan::clock::{ClockInterface, DataSource};
use clockscan::instrument::mock::{Role, SimulatedBench, SimulationSettings};
use clockscan::multifit::{modified_gauss, FitSetup};

pub fn multifit_window(c: &mut Criterion) {
    let setup = FitSetup::new().init().unwrap();
    let x: Vec<f64> = (8200..8240).map(|x| x as f64).collect();
    let mut rng = rand::thread_rng();

    c.bench_function("multifit 40 pts", |b| {
        b.iter(|| {
            let act = [
                -0.6 * rng.gen_range(0.7..1.3),
                8220.0 + rng.gen_range(-4.0..4.0),
                8.0 * rng.gen_range(0.8..1.2),
                1.0,
            ];
            let y: Vec<f64> = x
                .iter()
                .map(|&xi| modified_gauss(xi, act) + rng.gen_range(-0.01..0.01))
                .collect();
            black_box(setup.fit(&x, &y).map(|f| f.n_iterations))
        })
    });
}

pub fn simulated_scan(c: &mut Criterion) {
    let settings = SimulationSettings::default();
    let bench = SimulatedBench::new(settings, Some(1));
    let interface = ClockInterface::new(
        Box::new(bench.instrument(Role::Generator, "SG386")),
        Box::new(bench.instrument(Role::LockIn, "SR830")),
        Box::new(bench.instrument(Role::PowerSupply, "SPD3303X")),
        DataSource::Live { save_dir: None },
    );
    let mut analysis = FreqAnalysis::new(interface, settings.freq_base);

    c.bench_function("single_scan 400 pts", |b| {
        b.iter(|| black_box(analysis.single_scan(8000, 8400).ok()))
    });
}

criterion_group!(benches, multifit_window, simulated_scan);
criterion_main!(benches);
