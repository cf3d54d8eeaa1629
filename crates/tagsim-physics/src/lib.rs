//! # tagsim-physics
//!
//! Simplified RF model for backscatter tags.
//!
//! Every transmission is a complex phasor. Travelling a distance `d` at
//! wavelength `λ` multiplies it by the path gain
//!
//! ```text
//! g(d) = a(d) · e^{j·2πd/λ}
//! ```
//!
//! where `a(d)` is the free-space (Friis) power attenuation `(λ / 4πd)²`,
//! clamped to 1 in the near field. Signals reaching a receiver within the
//! same resolution window add as phasors, so two equal signals half a
//! wavelength out of step cancel.

pub mod ledger;
pub mod propagation;

pub use ledger::ReceptionLedger;
pub use propagation::{PropagationModel, ScheduledArrival};

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tagsim_common::{ArrivalId, ConfigError, Position, SimTime, TagId};

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

// ============================================================================
// Physical Helpers
// ============================================================================

/// Wavelength in metres for a carrier frequency in Hz.
pub fn wavelength(frequency_hz: f64) -> f64 {
    SPEED_OF_LIGHT / frequency_hz
}

/// Phase accumulated over `distance_m`, in radians (not wrapped).
pub fn phase_angle(distance_m: f64, wavelength_m: f64) -> f64 {
    2.0 * PI * distance_m / wavelength_m
}

/// Time of flight over `distance_m`, rounded to the nearest nanosecond.
pub fn propagation_delay(distance_m: f64) -> SimTime {
    SimTime::from_secs_f64(distance_m / SPEED_OF_LIGHT).unwrap_or(SimTime::ZERO)
}

/// Linear superposition of phasors.
pub fn superpose<I>(phasors: I) -> Complex64
where
    I: IntoIterator<Item = Complex64>,
{
    phasors.into_iter().fold(Complex64::new(0.0, 0.0), |acc, p| acc + p)
}

// ============================================================================
// Path Loss and Detection
// ============================================================================

/// Distance attenuation law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathLoss {
    /// Free-space loss `(λ / 4πd)²`, clamped to 1.
    #[default]
    Friis,
    /// No attenuation; only phase rotates with distance.
    Lossless,
}

impl PathLoss {
    /// Amplitude factor over `distance_m`.
    pub fn attenuation(&self, distance_m: f64, wavelength_m: f64) -> f64 {
        match self {
            PathLoss::Friis => {
                let a = (wavelength_m / (4.0 * PI * distance_m)).powi(2);
                if a.is_finite() {
                    a.min(1.0)
                } else {
                    1.0
                }
            }
            PathLoss::Lossless => 1.0,
        }
    }

    /// Complex path gain over `distance_m`.
    pub fn gain(&self, distance_m: f64, wavelength_m: f64) -> Complex64 {
        Complex64::from_polar(
            self.attenuation(distance_m, wavelength_m),
            phase_angle(distance_m, wavelength_m),
        )
    }
}

/// How a received field is turned into a voltage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detector {
    /// Voltage is the field magnitude.
    #[default]
    Linear,
    /// Envelope detector behind an antenna of the given impedance.
    Rectified {
        /// Antenna impedance, ohms.
        impedance_ohm: f64,
    },
}

impl Detector {
    /// Voltage for a superposed field.
    pub fn voltage(&self, field: Complex64) -> f64 {
        match self {
            Detector::Linear => field.norm(),
            Detector::Rectified { impedance_ohm } => {
                (impedance_ohm * field.norm() / 500.0).sqrt() / std::f64::consts::SQRT_2
            }
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

fn default_range_m() -> f64 {
    100.0
}

fn default_resolution_window_s() -> f64 {
    1e-9
}

/// Propagation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropagationConfig {
    /// Receivers farther than this from the sender hear nothing.
    #[serde(default = "default_range_m")]
    pub range_m: f64,
    /// Arrivals closer together than this are merged into one reception.
    #[serde(default = "default_resolution_window_s")]
    pub resolution_window_s: f64,
    /// Attenuation law.
    #[serde(default)]
    pub path_loss: PathLoss,
    /// Detector model.
    #[serde(default)]
    pub detector: Detector,
    /// Standard deviation of complex Gaussian receiver noise (0 disables).
    #[serde(default)]
    pub noise_std: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig {
            range_m: default_range_m(),
            resolution_window_s: default_resolution_window_s(),
            path_loss: PathLoss::default(),
            detector: Detector::default(),
            noise_std: 0.0,
        }
    }
}

impl PropagationConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.range_m > 0.0) {
            return Err(invalid("propagation.range_m", "must be positive"));
        }
        if !(self.resolution_window_s >= 0.0) || !self.resolution_window_s.is_finite() {
            return Err(invalid("propagation.resolution_window_s", "must be finite and non-negative"));
        }
        if !(self.noise_std >= 0.0) || !self.noise_std.is_finite() {
            return Err(invalid("propagation.noise_std", "must be finite and non-negative"));
        }
        if let Detector::Rectified { impedance_ohm } = self.detector {
            if !(impedance_ohm > 0.0) {
                return Err(invalid("propagation.detector.impedance_ohm", "must be positive"));
            }
        }
        Ok(())
    }
}

fn default_exciter_amplitude() -> f64 {
    1.0
}

/// A continuous-wave carrier source that tags reflect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExciterConfig {
    /// Exciter location.
    pub position: Position,
    /// Carrier frequency, Hz.
    pub frequency_hz: f64,
    /// Emitted amplitude.
    #[serde(default = "default_exciter_amplitude")]
    pub amplitude: f64,
}

impl ExciterConfig {
    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frequency_hz > 0.0) || !self.frequency_hz.is_finite() {
            return Err(invalid("exciter.frequency_hz", "must be positive"));
        }
        if !self.amplitude.is_finite() {
            return Err(invalid("exciter.amplitude", "must be finite"));
        }
        Ok(())
    }
}

pub(crate) fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Signals and Receptions
// ============================================================================

/// A transmission leaving a tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Transmitting tag.
    pub sender: TagId,
    /// Sender position at emission.
    pub position: Position,
    /// Carrier frequency, Hz.
    pub frequency_hz: f64,
    /// Emitted phasor (amplitude, reflection and phase combined).
    pub phasor: Complex64,
    /// Emission time.
    pub emitted_at: SimTime,
}

/// One transmission as seen by one receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    /// Ledger identifier.
    pub id: ArrivalId,
    /// Transmitting tag.
    pub sender: TagId,
    /// Arrival time.
    pub time: SimTime,
    /// Received phasor.
    pub phasor: Complex64,
    /// Sender-receiver distance at emission, metres.
    pub distance_m: f64,
    /// Distance at the previous transmission between the same pair.
    pub previous_distance_m: Option<f64>,
    /// Sender carrier frequency, Hz.
    pub frequency_hz: f64,
}

/// The superposed result handed to a receiving machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Reception {
    /// Detected voltage.
    pub voltage: f64,
    /// Phase of the net field, radians in (-π, π].
    pub phase: f64,
    /// Net field.
    pub field: Complex64,
    /// Number of arrivals merged into this reception.
    pub arrivals: usize,
    /// Sender of the earliest merged arrival.
    pub sender: TagId,
    /// Distance to that sender.
    pub distance_m: f64,
    /// Previous distance to that sender.
    pub previous_distance_m: Option<f64>,
    /// That sender's frequency.
    pub frequency_hz: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wavelength_and_phase() {
        let lambda = wavelength(SPEED_OF_LIGHT / 2.0);
        assert_relative_eq!(lambda, 2.0);
        assert_relative_eq!(phase_angle(1.0, lambda), PI);
    }

    #[test]
    fn test_friis_attenuation() {
        let lambda = 0.3;
        let d = 3.0;
        let expected = (lambda / (4.0 * PI * d)).powi(2);
        assert_relative_eq!(PathLoss::Friis.attenuation(d, lambda), expected);
        assert_relative_eq!(PathLoss::Friis.attenuation(0.0, lambda), 1.0);
        assert_relative_eq!(PathLoss::Friis.attenuation(1e-6, lambda), 1.0);
        assert_relative_eq!(PathLoss::Lossless.attenuation(1e6, lambda), 1.0);
    }

    #[test]
    fn test_gain_rotates_phase() {
        let g = PathLoss::Lossless.gain(0.25, 1.0);
        assert_relative_eq!(g.re, 0.0, epsilon = 1e-12);
        assert_relative_eq!(g.im, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_superpose_opposite_phase_cancels() {
        let a = Complex64::from_polar(0.7, 0.3);
        let b = Complex64::from_polar(0.7, 0.3 + PI);
        assert!(superpose([a, b]).norm() < 1e-12);
    }

    #[test]
    fn test_superpose_equal_phase_adds() {
        let a = Complex64::from_polar(0.7, 1.1);
        let b = Complex64::from_polar(0.5, 1.1);
        assert_relative_eq!(superpose([a, b]).norm(), 1.2, epsilon = 1e-12);
        assert_eq!(superpose(Vec::new()), Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_rectified_detector() {
        let detector = Detector::Rectified { impedance_ohm: 50.0 };
        let v = detector.voltage(Complex64::new(2.0, 0.0));
        assert_relative_eq!(v, (50.0_f64 * 2.0 / 500.0).sqrt() / 2.0_f64.sqrt());
        assert_relative_eq!(Detector::Linear.voltage(Complex64::new(3.0, 4.0)), 5.0);
    }

    #[test]
    fn test_propagation_delay() {
        assert_eq!(propagation_delay(SPEED_OF_LIGHT * 1e-6), SimTime::from_micros(1));
        assert_eq!(propagation_delay(0.0), SimTime::ZERO);
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config: PropagationConfig =
            serde_yaml::from_str("detector: { kind: rectified, impedance_ohm: 50 }").unwrap();
        assert_eq!(config.path_loss, PathLoss::Friis);
        assert_eq!(config.detector, Detector::Rectified { impedance_ohm: 50.0 });
        assert!(config.validate().is_ok());

        let bad = PropagationConfig {
            range_m: 0.0,
            ..PropagationConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidParameter { .. })));
    }
}
