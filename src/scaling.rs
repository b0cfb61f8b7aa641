//! Scaling between raw register ticks and physical units.
//!
//! The DPM86xx reports voltages in centi-volts and currents in milli-amps. Conversions from
//! ticks are exact; conversions to ticks truncate towards zero.

/// Absorbs binary floating point error (e.g. `0.29 * 100.0 == 28.999999999999996`) before
/// truncating, so a value read from the device always converts back to the same tick count.
const TICK_EPSILON: f64 = 1e-6;

/// Linear scale between one register's ticks and its physical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    /// Number of ticks per physical unit. E.g. `100` for centi-volts.
    pub ticks_per_unit: u32,
}

/// Volts <-> centi-volts.
pub const VOLTS: Scale = Scale::new(100);
/// Amperes <-> milli-amps.
pub const AMPERES: Scale = Scale::new(1000);

impl Scale {
    pub const fn new(ticks_per_unit: u32) -> Self {
        Self { ticks_per_unit }
    }

    /// Convert a raw register value to physical units.
    #[inline]
    pub fn to_physical(&self, ticks: u32) -> f64 {
        f64::from(ticks) / f64::from(self.ticks_per_unit)
    }

    /// Convert a physical value to (signed, unbounded) ticks, truncating towards zero.
    ///
    /// Returns `None` for values which are not finite. Range checks against the register
    /// bounds are left to the caller.
    #[inline]
    pub fn to_ticks(&self, value: f64) -> Option<i64> {
        if !value.is_finite() {
            return None;
        }
        let scaled = value * f64::from(self.ticks_per_unit);
        let nudged = if scaled >= 0.0 {
            scaled + TICK_EPSILON
        } else {
            scaled - TICK_EPSILON
        };
        Some(nudged.trunc() as i64)
    }
}

/// Round to two decimal places, the resolution used for all reported powers and currents.
#[inline]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
