#![warn(clippy::pedantic)]

use thiserror::Error;

use crate::scan::{Sample, Scan};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("diagnostic range [{low}, {high}) not present in scan")]
pub struct RangeError {
    pub low: i64,
    pub high: i64,
}

/// The known neighbourhood of the resonance, in detuning units, and the half width of the
/// window cut around the dip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticRange {
    pub low: i64,
    pub high: i64,
    pub half_width: usize,
}

impl Default for DiagnosticRange {
    fn default() -> Self {
        DiagnosticRange {
            low: 8150,
            high: 8300,
            half_width: 20,
        }
    }
}

/// Samples around the located dip.
#[derive(Debug, Clone, PartialEq)]
pub struct Window<'a> {
    pub samples: &'a [Sample],
    /// index of the minimum within `samples`
    pub dip: usize,
}

impl Window<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn x(&self) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        self.samples.iter().map(|s| s.detuning as f64).collect()
    }

    #[must_use]
    pub fn y(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.intensity).collect()
    }
}

impl DiagnosticRange {
    /// Find the lowest-intensity sample inside `[low, high)` and cut `[dip - W, dip + W)` around
    /// it, clipped to that range. The bounds are looked up by exact detuning.
    /// # Errors
    /// `RangeError` if either bound is not one of the scan's detunings.
    pub fn locate<'a>(&self, scan: &'a Scan) -> Result<Window<'a>, RangeError> {
        let range = scan.index_range(self.low, self.high).ok_or(RangeError {
            low: self.low,
            high: self.high,
        })?;
        let restricted = &scan.samples()[range];

        let Some(dip) = restricted
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.intensity.total_cmp(&b.1.intensity))
            .map(|(i, _)| i)
        else {
            return Ok(Window {
                samples: restricted,
                dip: 0,
            });
        };

        let start = dip.saturating_sub(self.half_width);
        let end = (dip + self.half_width).min(restricted.len());
        Ok(Window {
            samples: &restricted[start..end],
            dip: dip - start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_with_dip(low: i64, high: i64, dip_at: i64) -> Scan {
        (low..high)
            .map(|d| {
                let dx = (d - dip_at) as f64;
                Sample::new(d, 1.0 - 0.5 * (-dx * dx / 50.0).exp())
            })
            .collect()
    }

    #[test]
    fn centered_window() {
        let scan = scan_with_dip(8000, 8400, 8220);
        let range = DiagnosticRange::default();
        let win = range.locate(&scan).unwrap();
        assert_eq!(win.len(), 40);
        assert_eq!(win.samples[win.dip].detuning, 8220);
        assert_eq!(win.samples[0].detuning, 8200);
        assert_eq!(win.samples[39].detuning, 8239);
    }

    #[test]
    fn clipped_at_the_low_edge() {
        let scan = scan_with_dip(8000, 8400, 8155);
        let win = DiagnosticRange::default().locate(&scan).unwrap();
        assert_eq!(win.samples[0].detuning, 8150);
        assert_eq!(win.samples[win.dip].detuning, 8155);
        assert_eq!(win.len(), 25);
    }

    #[test]
    fn clipped_at_the_high_edge() {
        let scan = scan_with_dip(8000, 8400, 8295);
        let win = DiagnosticRange::default().locate(&scan).unwrap();
        assert_eq!(win.samples[win.dip].detuning, 8295);
        assert_eq!(win.samples.last().unwrap().detuning, 8299);
        assert_eq!(win.len(), 25);
    }

    #[test]
    fn dip_outside_the_range_is_ignored() {
        // deepest point of the scan lies outside [8150, 8300)
        let mut samples: Vec<Sample> = scan_with_dip(8000, 8400, 8250).samples().to_vec();
        samples[10].intensity = -5.0;
        let scan = Scan::new(samples);
        let win = DiagnosticRange::default().locate(&scan).unwrap();
        assert_eq!(win.samples[win.dip].detuning, 8250);
    }

    #[test]
    fn missing_bounds() {
        let scan = scan_with_dip(8000, 8200, 8100);
        assert_eq!(
            DiagnosticRange::default().locate(&scan).unwrap_err(),
            RangeError {
                low: 8150,
                high: 8300
            }
        );
    }

    #[test]
    fn custom_half_width() {
        let scan = scan_with_dip(8000, 8400, 8220);
        let range = DiagnosticRange {
            half_width: 5,
            ..DiagnosticRange::default()
        };
        let win = range.locate(&scan).unwrap();
        assert_eq!(win.len(), 10);
        assert_eq!(win.dip, 5);
    }
}
