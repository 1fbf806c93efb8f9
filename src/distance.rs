//! Signal strength to distance conversion using a log-distance path-loss model

/// Calibration constants for [`Calibration::distance`]
///
/// Fixed per deployment. Events are never recalibrated after capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// RSSI measured at one meter (A)
    pub measured_power: f64,
    /// Path loss exponent (n), usually between 2 and 4 indoors
    pub path_loss_exponent: f64,
}

impl Calibration {
    pub const DEFAULT: Calibration = Calibration {
        measured_power: -60.0,
        path_loss_exponent: 2.6,
    };

    /// Estimate distance in meters: `10^((A - rssi) / (10 * n))`
    pub fn distance(&self, rssi: i16) -> f64 {
        let exponent = (self.measured_power - f64::from(rssi)) / (10.0 * self.path_loss_exponent);
        10f64.powf(exponent)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration::DEFAULT
    }
}
