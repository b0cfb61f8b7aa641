//! This module is used to define the registers ("functions") on the DPM86xx PSUs.

use core::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::error::Error;

/// Registers addressable over the DPM86xx simple communication protocol.
///
/// The discriminant is the two digit opcode sent on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum DpmRegister {
    /// __R/W__ - Voltage setting.
    ///
    /// Value is in centi-volts. E.g. 25.5V => `2550`.
    VoltageSetting = 10,
    /// __R/W__ - Current setting.
    ///
    /// Value is in milli-amps. E.g. 2.55A => `2550`.
    CurrentSetting = 11,
    /// __R/W__ - Switched output.
    /// * `0` - Off.
    /// * `1` - On.
    OutputEnable = 12,
    /// __R__ - Output voltage display value, centi-volts.
    Voltage = 30,
    /// __R__ - Output current display value, milli-amps.
    Current = 31,
    /// __R/W__ - Constant voltage / constant current state.
    ///
    /// See [`ConstantMode`].
    ConstantMode = 32,
    /// __R__ - Temperature in degrees celsius.
    Temperature = 33,
}

/// Whether a register may be read, written or both.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub const fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub const fn writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

impl DpmRegister {
    /// Largest raw value accepted by a voltage setting write. 29.00V.
    pub const VOLTAGE_MAX_TICKS: u32 = 2900;
    /// Largest raw value accepted by a current setting write. 9.000A.
    pub const CURRENT_MAX_TICKS: u32 = 9000;

    pub const fn opcode(self) -> u8 {
        self as u8
    }

    pub const fn access(self) -> Access {
        match self {
            DpmRegister::VoltageSetting
            | DpmRegister::CurrentSetting
            | DpmRegister::OutputEnable
            | DpmRegister::ConstantMode => Access::ReadWrite,
            DpmRegister::Voltage | DpmRegister::Current | DpmRegister::Temperature => {
                Access::ReadOnly
            }
        }
    }

    /// Inclusive range of raw values which may be written to this register.
    ///
    /// `None` for registers which cannot be written.
    pub const fn write_bounds(self) -> Option<(u32, u32)> {
        match self {
            DpmRegister::VoltageSetting => Some((0, Self::VOLTAGE_MAX_TICKS)),
            DpmRegister::CurrentSetting => Some((0, Self::CURRENT_MAX_TICKS)),
            DpmRegister::OutputEnable | DpmRegister::ConstantMode => Some((0, 1)),
            DpmRegister::Voltage | DpmRegister::Current | DpmRegister::Temperature => None,
        }
    }
}

impl fmt::Display for DpmRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.opcode())
    }
}

/// Regulation mode of the supply.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum ConstantMode {
    /// Constant voltage regulation mode.
    #[default]
    Voltage = 0,
    /// Constant current regulation mode.
    Current = 1,
}

impl From<ConstantMode> for u32 {
    fn from(value: ConstantMode) -> Self {
        value as u32
    }
}

impl TryFrom<u32> for ConstantMode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConstantMode::Voltage),
            1 => Ok(ConstantMode::Current),
            _ => Err(Error::InvalidResponse {
                register: DpmRegister::ConstantMode,
                value,
            }),
        }
    }
}

/// Used to be less ambiguous and whether something is on or off.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    /// Disabled.
    #[default]
    Off = 0,
    /// Enabled.
    On = 1,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

/// The settings exposed by [`crate::psu::Dpm86::get_setting`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Setting {
    /// Target voltage in volts.
    Voltage,
    /// Current limit in amperes.
    Current,
    /// Product of the voltage and current settings in watts. Read only.
    Power,
}
