use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

fn window(low: i64, high: i64) -> Vec<f64> {
    (low..high).map(|x| x as f64).collect()
}

#[test]
fn basic() {
    let mut rng = StdRng::seed_from_u64(7);
    let setup = FitSetup::new().init().unwrap();
    let x = window(8200, 8240);

    for _ in 0..100 {
        let actual = [
            rng.gen_range(-2.0..-0.5),
            8220.0 + rng.gen_range(-3.0..3.0),
            rng.gen_range(5.0..9.0),
            rng.gen_range(0.5..2.0),
        ];
        let y: Vec<f64> = x.iter().map(|&xi| modified_gauss(xi, actual)).collect();

        let res = setup.fit(&x, &y).unwrap();
        assert!((res.center() - actual[1]).abs() < 1.0e-4);
        assert!((res.params[0] - actual[0]).abs() < 1.0e-4);
        assert!((res.params[2] - actual[2]).abs() < 1.0e-4);
        assert!((res.params[3] - actual[3]).abs() < 1.0e-4);
    }
}

#[test]
fn iterations() {
    let setup = FitSetup::new().init().unwrap();
    let x = window(8200, 8240);
    let actual = [-1.0, 8221.5, 7.0, 1.2];
    let y: Vec<f64> = x.iter().map(|&xi| modified_gauss(xi, actual)).collect();

    let res = setup.fit(&x, &y).unwrap();
    assert!(res.n_iterations < 50);
    assert_eq!(res.fitted.len(), x.len());
    assert_eq!(res.band.len(), x.len());
}

#[test]
fn noisy_resonance() {
    let mut rng = StdRng::seed_from_u64(42);
    let setup = FitSetup::new().init().unwrap();
    let x = window(8200, 8240);
    let actual = [-0.8, 8219.0, 6.0, 1.0];
    let y: Vec<f64> = x
        .iter()
        .map(|&xi| modified_gauss(xi, actual) + rng.gen_range(-0.01..0.01))
        .collect();

    let fit = setup.fit(&x, &y).unwrap();
    assert!((fit.center() - actual[1]).abs() < 0.5);
    assert!(fit.band.iter().all(|b| b.is_finite() && *b >= 0.0));

    let res = fit.resonance(&x).unwrap();
    assert!((res.frequency - actual[1]).abs() <= 1.0);
    assert!(res.weight.is_finite());
    assert!(res.weight > 1.0);
}

#[test]
fn weight_follows_fitted_minimum() {
    let fit = Fit {
        params: [-1.0, 2.0, 1.0, 1.0],
        param_errs: [0.0; 4],
        fitted: vec![1.0, 0.5, 0.2, 0.6],
        band: vec![0.1, 0.1, 0.05, 0.1],
        n_iterations: 1,
        red_chisq: 0.0,
    };
    let res = fit.resonance(&[10.0, 11.0, 12.0, 13.0]).unwrap();
    assert_eq!(res.frequency, 12.0);
    assert!((res.weight - 2.0).abs() < 1e-12);
}

#[test]
fn zero_band_is_degenerate() {
    let fit = Fit {
        params: [-1.0, 2.0, 1.0, 1.0],
        param_errs: [0.0; 4],
        fitted: vec![1.0, 0.5, 0.6],
        band: vec![0.0; 3],
        n_iterations: 1,
        red_chisq: 0.0,
    };
    assert!(matches!(
        fit.resonance(&[1.0, 2.0, 3.0]),
        Err(FitFailure::Degenerate(_))
    ));
}

#[test]
fn flat_window() {
    let setup = FitSetup::new().init().unwrap();
    let x = window(8200, 8240);
    let y = vec![0.75; x.len()];
    let err = setup.fit(&x, &y).unwrap_err();
    assert!(matches!(err, FitFailure::Degenerate(_)));
}

#[test]
fn too_few_samples() {
    let setup = FitSetup::new().init().unwrap();
    let x = window(8200, 8204);
    let y = vec![1.0, 0.5, 0.4, 0.9];
    assert_eq!(
        setup.fit(&x, &y).unwrap_err(),
        FitFailure::InsufficientSamples { got: 4, needed: 5 }
    );
}

#[test]
fn mismatched_lengths() {
    let setup = FitSetup::new().init().unwrap();
    assert_eq!(
        setup.fit(&[1.0, 2.0], &[1.0]).unwrap_err(),
        FitFailure::MismatchedLengths { x: 2, y: 1 }
    );
}

#[test]
fn non_finite_sample() {
    let setup = FitSetup::new().init().unwrap();
    let x = window(0, 10);
    let mut y = vec![1.0; 10];
    y[4] = f64::NAN;
    assert!(matches!(
        setup.fit(&x, &y),
        Err(FitFailure::Degenerate(_))
    ));
}

#[test]
fn clipped_window() {
    // dip close to the window edge, as after clipping at the end of the diagnostic range
    let setup = FitSetup::new().init().unwrap();
    let x = window(8280, 8300);
    let actual = [-1.0, 8293.0, 4.0, 1.0];
    let y: Vec<f64> = x.iter().map(|&xi| modified_gauss(xi, actual)).collect();
    let res = setup.fit(&x, &y).unwrap();
    assert!((res.center() - actual[1]).abs() < 1.0e-3);
}

#[test]
fn builder() {
    let setup = FitSetup::new()
        .opt_max_iterations(Some(10))
        .opt_xtol(None)
        .opt_gtol(Some(1.0e-6))
        .opt_ftol(Some(1.0e-9))
        .init()
        .unwrap();
    assert_eq!(setup.max_iterations, 10);
    assert_eq!(setup.xtol, FitSetup::default().xtol);
    assert_eq!(setup.gtol, 1.0e-6);

    assert!(FitSetup::new().max_iterations(0).init().is_none());
    assert!(FitSetup::new().xtol(-1.0).init().is_none());
    assert!(FitSetup::new().ftol(f64::NAN).init().is_none());
}
