#![warn(clippy::pedantic)]

use log::{info, warn};
use thiserror::Error;

pub mod mock;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcquisitionError {
    #[error("instrument {0} is not connected")]
    Unavailable(String),
    #[error("instrument {name} rejected command '{command}'")]
    Rejected { name: String, command: String },
    #[error("instrument {name} returned unparsable reading '{reading}'")]
    BadReading { name: String, reading: String },
    #[error("requested range [{low}, {high}) not available: {reason}")]
    Range {
        low: i64,
        high: i64,
        reason: String,
    },
    #[error("recording error: {0}")]
    Recording(String),
}

/// Raw command access to one bench instrument. The command syntax is whatever the device
/// speaks; the trait only moves strings.
pub trait Instrument {
    fn name(&self) -> &str;

    /// Send `command` immediately followed by `value`.
    /// # Errors
    /// Returns an `AcquisitionError` if the transport fails.
    fn write(&mut self, command: &str, value: &str) -> Result<(), AcquisitionError>;

    /// # Errors
    /// Returns an `AcquisitionError` if the transport fails.
    fn query(&mut self, command: &str) -> Result<String, AcquisitionError>;

    /// Write, then read the setting back with `command?`. The readback is logged and returned.
    /// # Errors
    /// Propagates transport failures of either the write or the query.
    fn write_and_verify(&mut self, command: &str, value: &str) -> Result<String, AcquisitionError> {
        self.write(command, value)?;
        let response = self.query(&format!("{command}?"))?;
        info!("{} response -> {}: {}", self.name(), command, response.trim());
        Ok(response)
    }
}

impl<T: Instrument + ?Sized> Instrument for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn write(&mut self, command: &str, value: &str) -> Result<(), AcquisitionError> {
        (**self).write(command, value)
    }
    fn query(&mut self, command: &str) -> Result<String, AcquisitionError> {
        (**self).query(command)
    }
    fn write_and_verify(&mut self, command: &str, value: &str) -> Result<String, AcquisitionError> {
        (**self).write_and_verify(command, value)
    }
}

/// Ordered command tables sent when the experiment starts and stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentSetup {
    pub setup: Vec<(String, String)>,
    pub term: Vec<(String, String)>,
}

impl InstrumentSetup {
    /// Send every setup command with verification.
    /// # Errors
    /// Stops at the first command the instrument fails on.
    pub fn setup_config(&self, inst: &mut dyn Instrument) -> Result<(), AcquisitionError> {
        for (command, value) in &self.setup {
            inst.write_and_verify(command, value)?;
        }
        Ok(())
    }

    /// Send every termination command. Failures are logged and the remaining commands still
    /// go out, so one stuck device does not leave the others running.
    pub fn term_config(&self, inst: &mut dyn Instrument) {
        for (command, value) in &self.term {
            if let Err(e) = inst.write_and_verify(command, value) {
                warn!("{}: termination command '{}' failed: {}", inst.name(), command, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl Instrument for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn write(&mut self, command: &str, value: &str) -> Result<(), AcquisitionError> {
            if self.fail_on == Some(command) {
                return Err(AcquisitionError::Rejected {
                    name: "recorder".into(),
                    command: command.into(),
                });
            }
            self.log.push(format!("{command}{value}"));
            Ok(())
        }
        fn query(&mut self, command: &str) -> Result<String, AcquisitionError> {
            self.log.push(command.to_string());
            Ok("1".into())
        }
    }

    fn table(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(c, v)| ((*c).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn setup_in_order_with_readback() {
        let setup = InstrumentSetup {
            setup: table(&[("ENBH", "1"), ("TYPE", "3")]),
            term: Vec::new(),
        };
        let mut inst = Recorder::default();
        setup.setup_config(&mut inst).unwrap();
        assert_eq!(inst.log, vec!["ENBH1", "ENBH?", "TYPE3", "TYPE?"]);
    }

    #[test]
    fn setup_stops_at_failure() {
        let setup = InstrumentSetup {
            setup: table(&[("ENBH", "1"), ("TYPE", "3"), ("SRAT", "10")]),
            term: Vec::new(),
        };
        let mut inst = Recorder {
            fail_on: Some("TYPE"),
            ..Recorder::default()
        };
        assert!(setup.setup_config(&mut inst).is_err());
        assert_eq!(inst.log, vec!["ENBH1", "ENBH?"]);
    }

    #[test]
    fn term_keeps_going() {
        let setup = InstrumentSetup {
            setup: Vec::new(),
            term: table(&[("OUTP CH1,", "OFF"), ("OUTP CH2,", "OFF")]),
        };
        let mut inst = Recorder {
            fail_on: Some("OUTP CH1,"),
            ..Recorder::default()
        };
        setup.term_config(&mut inst);
        assert_eq!(inst.log, vec!["OUTP CH2,OFF", "OUTP CH2,?"]);
    }
}
