#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use async_std::task;
use bytes::Bytes;
use gethostname::gethostname;
use log::info;
use thiserror::Error;
use zeromq::prelude::*;

use crate::scan::RunReport;

macro_rules! to_bytes {
    ($collection:expr) => {
        $collection.iter().flat_map(|x| x.to_le_bytes())
    };
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("zmq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),
    #[error("failed to write {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A sink for finished runs.
pub trait Report {
    /// # Errors
    /// Whatever the sink fails on; a failed report never affects the run itself.
    fn report(&mut self, run: &RunReport) -> Result<(), ReportError>;
}

/// Logs the series and a short summary.
#[derive(Debug, Default)]
pub struct LogReport;

impl Report for LogReport {
    fn report(&mut self, run: &RunReport) -> Result<(), ReportError> {
        info!(
            "{} finished{}: {} records ({} vs {})",
            run.mode,
            if run.cancelled { " (cancelled)" } else { "" },
            run.records.len(),
            run.mode.y_label(),
            run.mode.x_label(),
        );
        for r in &run.records {
            info!("  {:>12.4}  {:>10.2}  weight {:.3}", r.x, r.frequency, r.weight);
        }
        if run.records.is_empty() {
            return Ok(());
        }
        let freqs = run.frequencies();
        let n = freqs.len() as f64;
        let mean = freqs.iter().sum::<f64>() / n;
        let spread = (freqs.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n).sqrt();
        match run.weighted_mean_frequency() {
            Some(wmean) => info!(
                "mean {mean:.2} Hz, weighted mean {wmean:.2} Hz, spread {spread:.2} Hz"
            ),
            None => info!("mean {mean:.2} Hz, spread {spread:.2} Hz"),
        }
        Ok(())
    }
}

/// Writes `x,frequency,weight` rows.
#[derive(Debug)]
pub struct CsvReport {
    path: PathBuf,
}

impl CsvReport {
    #[must_use]
    pub fn new(path: &Path) -> Self {
        CsvReport {
            path: path.to_path_buf(),
        }
    }
}

impl Report for CsvReport {
    fn report(&mut self, run: &RunReport) -> Result<(), ReportError> {
        let csv_err = |source| ReportError::Csv {
            path: self.path.clone(),
            source,
        };
        let mut wtr = csv::Writer::from_path(&self.path).map_err(csv_err)?;
        for record in &run.records {
            wtr.serialize(record).map_err(csv_err)?;
        }
        wtr.flush()?;
        info!("wrote {} records to {}", run.records.len(), self.path.display());
        Ok(())
    }
}

/// Publishes finished runs on a PUB socket for remote plotting. Frames: hostname, mode,
/// then the x, frequency and weight series as little-endian f64 arrays.
pub struct ZmqReport {
    hostname: String,
    sock: zeromq::PubSocket,
    port: u16,
}

impl ZmqReport {
    /// # Errors
    /// Propagates any zeromq error in binding the socket.
    pub fn bind(port: u16) -> Result<Self, ReportError> {
        let mut sock = zeromq::PubSocket::new();
        task::block_on(sock.bind(format!("tcp://0.0.0.0:{port}").as_str()))?;
        Ok(ZmqReport {
            hostname: gethostname().to_string_lossy().into_owned(),
            sock,
            port,
        })
    }

    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    fn frames(&self, run: &RunReport) -> VecDeque<Bytes> {
        let mut frames = VecDeque::with_capacity(5);
        frames.push_back(Bytes::copy_from_slice(self.hostname.as_bytes()));
        frames.push_back(Bytes::from(run.mode.to_string()));
        frames.push_back(to_bytes!(run.xs()).collect::<Vec<u8>>().into());
        frames.push_back(to_bytes!(run.frequencies()).collect::<Vec<u8>>().into());
        frames.push_back(to_bytes!(run.weights()).collect::<Vec<u8>>().into());
        frames
    }
}

impl Report for ZmqReport {
    fn report(&mut self, run: &RunReport) -> Result<(), ReportError> {
        let mut frames = self.frames(run);
        let mut msg = zeromq::ZmqMessage::from(frames.pop_front().unwrap_or_default());
        for frame in frames {
            msg.push_back(frame);
        }
        task::block_on(self.sock.send(msg))?;
        info!("published {} records on port {}", run.records.len(), self.port);
        Ok(())
    }
}
