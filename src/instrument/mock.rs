#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

//! Simulated bench: a signal generator, a lock-in amplifier and a power supply sharing one
//! model of the atomic resonance. Used when no hardware backend is attached, and by tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{AcquisitionError, Instrument};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSettings {
    pub freq_base: i64,
    /// resonance detuning at zero current, Hz
    pub center: f64,
    /// gaussian sigma of the dip, Hz
    pub width: f64,
    pub depth: f64,
    pub baseline: f64,
    /// peak-to-peak half width of the uniform noise
    pub noise: f64,
    /// resonance shift per ampere, Hz/A
    pub zeeman_slope: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            freq_base: 6_834_682_610,
            center: 8220.0,
            width: 8.0,
            depth: 0.6,
            baseline: 1.0,
            noise: 0.01,
            zeeman_slope: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Generator,
    LockIn,
    PowerSupply,
}

#[derive(Debug)]
struct BenchState {
    settings: SimulationSettings,
    frequency: i64,
    current: f64,
    rng: StdRng,
    started: Instant,
}

impl BenchState {
    fn intensity(&mut self) -> f64 {
        let s = self.settings;
        let detuning = (self.frequency - s.freq_base) as f64;
        let center = s.center + s.zeeman_slope * self.current;
        let dx = detuning - center;
        let noise = if s.noise > 0.0 {
            self.rng.gen_range(-s.noise..=s.noise)
        } else {
            0.0
        };
        s.baseline - s.depth * (-dx * dx / (2.0 * s.width * s.width)).exp() + noise
    }
}

/// Shared state of the simulated bench; hand out one [`SimulatedInstrument`] per role.
#[derive(Debug, Clone)]
pub struct SimulatedBench {
    state: Rc<RefCell<BenchState>>,
}

impl SimulatedBench {
    #[must_use]
    pub fn new(settings: SimulationSettings, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let settings = SimulationSettings {
            noise: settings.noise.abs(),
            ..settings
        };
        SimulatedBench {
            state: Rc::new(RefCell::new(BenchState {
                settings,
                frequency: settings.freq_base,
                current: 0.0,
                rng,
                started: Instant::now(),
            })),
        }
    }

    #[must_use]
    pub fn instrument(&self, role: Role, name: &str) -> SimulatedInstrument {
        SimulatedInstrument {
            name: name.to_string(),
            role,
            registers: HashMap::new(),
            bench: Rc::clone(&self.state),
        }
    }

    #[must_use]
    pub fn current(&self) -> f64 {
        self.state.borrow().current
    }

    #[must_use]
    pub fn frequency(&self) -> i64 {
        self.state.borrow().frequency
    }
}

#[derive(Debug)]
pub struct SimulatedInstrument {
    name: String,
    role: Role,
    registers: HashMap<String, String>,
    bench: Rc<RefCell<BenchState>>,
}

impl SimulatedInstrument {
    fn rejected(&self, command: &str) -> AcquisitionError {
        AcquisitionError::Rejected {
            name: self.name.clone(),
            command: command.to_string(),
        }
    }
}

impl Instrument for SimulatedInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, command: &str, value: &str) -> Result<(), AcquisitionError> {
        let key = command.trim();
        let value = value.trim();
        {
            let mut bench = self.bench.borrow_mut();
            debug!(
                "[{:.3}] {} write {}{}",
                bench.started.elapsed().as_secs_f32(),
                self.name,
                key,
                value
            );
            match self.role {
                Role::Generator if key == "FREQ" => {
                    bench.frequency = value.parse().map_err(|_| self.rejected(command))?;
                }
                Role::PowerSupply if key.ends_with("CURR") => {
                    bench.current = value.parse().map_err(|_| self.rejected(command))?;
                }
                _ => {}
            }
        }
        self.registers.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, AcquisitionError> {
        let key = command.trim();
        if self.role == Role::LockIn && key.starts_with("OUTP?") {
            return Ok(format!("{:.9}", self.bench.borrow_mut().intensity()));
        }
        let register = key.trim_end_matches('?').trim();
        self.registers
            .get(register)
            .cloned()
            .ok_or_else(|| self.rejected(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimulationSettings {
        SimulationSettings {
            noise: 0.0,
            ..SimulationSettings::default()
        }
    }

    #[test]
    fn lock_in_follows_generator() {
        let bench = SimulatedBench::new(quiet(), Some(1));
        let mut gen = bench.instrument(Role::Generator, "SG386");
        let mut lockin = bench.instrument(Role::LockIn, "SR830");

        let base = quiet().freq_base;
        gen.write("FREQ", &(base + 8220).to_string()).unwrap();
        let on_resonance: f64 = lockin.query("OUTP?3").unwrap().parse().unwrap();
        gen.write("FREQ", &(base + 8000).to_string()).unwrap();
        let off_resonance: f64 = lockin.query("OUTP?3").unwrap().parse().unwrap();

        assert!((on_resonance - 0.4).abs() < 1e-6);
        assert!((off_resonance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn current_shifts_resonance() {
        let bench = SimulatedBench::new(quiet(), Some(1));
        let mut gen = bench.instrument(Role::Generator, "SG386");
        let mut lockin = bench.instrument(Role::LockIn, "SR830");
        let mut supply = bench.instrument(Role::PowerSupply, "SPD3303X");

        let readback = supply.write_and_verify("CH1:CURR ", "2").unwrap();
        assert_eq!(readback, "2");
        assert_eq!(bench.current(), 2.0);

        gen.write("FREQ", &(quiet().freq_base + 8226).to_string())
            .unwrap();
        let y: f64 = lockin.query("OUTP?3").unwrap().parse().unwrap();
        assert!((y - 0.4).abs() < 1e-6);
    }

    #[test]
    fn registers_read_back() {
        let bench = SimulatedBench::new(quiet(), None);
        let mut lockin = bench.instrument(Role::LockIn, "SR830");
        assert_eq!(lockin.write_and_verify("SENS", "8").unwrap(), "8");
        assert!(lockin.query("OFLT?").is_err());
    }

    #[test]
    fn bad_frequency_rejected() {
        let bench = SimulatedBench::new(quiet(), None);
        let mut gen = bench.instrument(Role::Generator, "SG386");
        assert!(matches!(
            gen.write("FREQ", "lots"),
            Err(AcquisitionError::Rejected { .. })
        ));
    }
}
