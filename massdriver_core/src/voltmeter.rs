//! Multi-channel averaged voltmeter.

use massdriver_traits::AdcChannel;

use crate::approx::{Approximator, Curve};
use crate::error::{DriverError, Result};
use crate::hw_error::hw;

/// ADC channels paired 1:1 with calibration curves.
pub struct VoltageMeter<A, C = Curve> {
    adcs: Vec<A>,
    curves: Vec<C>,
    samples: u32,
    raw: Vec<u16>,
    acc: Vec<u64>,
    readings: Vec<f64>,
}

impl<A: AdcChannel, C: Approximator> VoltageMeter<A, C> {
    pub fn new(samples: u32, adcs: Vec<A>, curves: Vec<C>) -> Result<Self> {
        if adcs.len() != curves.len() {
            return Err(DriverError::PinApproximatorMismatch {
                pins: adcs.len(),
                curves: curves.len(),
            });
        }
        if samples == 0 {
            return Err(DriverError::InvalidSampleCount);
        }
        let n = adcs.len();
        Ok(Self {
            adcs,
            curves,
            samples,
            raw: vec![0; n],
            acc: vec![0; n],
            readings: vec![0.0; n],
        })
    }

    pub fn configure(&mut self) -> Result<()> {
        for adc in &mut self.adcs {
            adc.configure().map_err(hw)?;
        }
        tracing::debug!(channels = self.adcs.len(), samples = self.samples, "voltmeter configured");
        Ok(())
    }

    pub fn channels(&self) -> usize {
        self.adcs.len()
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Sample every channel `samples` times, interleaved, and store the averages.
    fn sample(&mut self) -> Result<()> {
        self.acc.iter_mut().for_each(|a| *a = 0);
        for _ in 0..self.samples {
            for (acc, adc) in self.acc.iter_mut().zip(self.adcs.iter_mut()) {
                // u32 samples of u16 codes cannot overflow u64
                *acc += u64::from(adc.read().map_err(hw)?);
            }
        }
        for (raw, acc) in self.raw.iter_mut().zip(&self.acc) {
            // average of u16 values always fits
            *raw = (acc / u64::from(self.samples)) as u16;
        }
        Ok(())
    }

    /// Averaged raw codes into `buf`; fills at most `channels()` entries.
    pub fn read_raw_into<'b>(&mut self, buf: &'b mut [u16]) -> Result<&'b [u16]> {
        self.sample()?;
        let n = buf.len().min(self.raw.len());
        buf[..n].copy_from_slice(&self.raw[..n]);
        Ok(&buf[..n])
    }

    /// Converted voltages into `buf`; fills at most `channels()` entries.
    pub fn read_voltages_into<'b>(&mut self, buf: &'b mut [f64]) -> Result<&'b [f64]> {
        self.sample()?;
        let n = buf.len().min(self.raw.len());
        for ((out, code), curve) in buf[..n].iter_mut().zip(&self.raw).zip(&self.curves) {
            *out = curve.convert(*code);
        }
        Ok(&buf[..n])
    }

    /// Sample and convert into the internal buffer.
    pub fn voltages(&mut self) -> Result<&[f64]> {
        self.sample()?;
        for ((out, code), curve) in self.readings.iter_mut().zip(&self.raw).zip(&self.curves) {
            *out = curve.convert(*code);
        }
        Ok(&self.readings)
    }

    /// Averaged codes from the most recent read.
    pub fn raw_codes(&self) -> &[u16] {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::{Linear, Point};
    use massdriver_hardware::SimAdc;

    fn unity() -> Curve {
        Curve::Linear(Linear::new(1.0, 0.0))
    }

    #[test]
    fn mismatch_rejected() {
        let err = VoltageMeter::new(4, vec![SimAdc::constant(1)], vec![unity(), unity()])
            .err()
            .unwrap();
        assert_eq!(err, DriverError::PinApproximatorMismatch { pins: 1, curves: 2 });
    }

    #[test]
    fn zero_samples_rejected() {
        let err = VoltageMeter::new(0, vec![SimAdc::constant(1)], vec![unity()])
            .err()
            .unwrap();
        assert_eq!(err, DriverError::InvalidSampleCount);
    }

    #[test]
    fn averages_then_converts() {
        let half = Curve::fit(&[Point::new(0, 0.0), Point::new(100, 50.0)]).unwrap();
        let adcs = vec![SimAdc::with_pattern(100, vec![-10, 10]), SimAdc::constant(40)];
        let mut vm = VoltageMeter::new(4, adcs.clone(), vec![half, unity()]).unwrap();
        vm.configure().unwrap();
        assert!(adcs.iter().all(SimAdc::is_configured));

        let v = vm.voltages().unwrap().to_vec();
        assert_eq!(vm.raw_codes(), &[100, 40]);
        assert!((v[0] - 50.0).abs() < 1e-9);
        assert!((v[1] - 40.0).abs() < 1e-9);

        let mut short = [0u16; 1];
        assert_eq!(vm.read_raw_into(&mut short).unwrap(), &[100]);

        let mut wide = [0.0f64; 3];
        assert_eq!(vm.read_voltages_into(&mut wide).unwrap().len(), 2);
    }

    #[test]
    fn large_sample_counts_average_full_scale() {
        let mut vm = VoltageMeter::new(70_000, vec![SimAdc::constant(u16::MAX)], vec![unity()]).unwrap();
        let v = vm.voltages().unwrap().to_vec();
        assert_eq!(vm.raw_codes(), &[u16::MAX]);
        assert!((v[0] - f64::from(u16::MAX)).abs() < 1e-9);
    }
}
