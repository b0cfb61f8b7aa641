use fugit::MillisDurationU32;

use crate::{
    error::{Error, Result},
    register::{ConstantMode, DpmRegister, Setting, State},
    scaling::{self, AMPERES, Scale, VOLTS},
    transport::{Delay, Transport},
};

/// Time the supply needs between sampling the output voltage and the output current.
pub const SETTLE_DELAY: MillisDurationU32 = MillisDurationU32::millis(200);

/// Typed, unit-aware access to one DPM86xx supply.
///
/// For it's methods, we generally use the nomenclature that "set" means to write a configuration
/// and "get" means to read back a configuration value or a measured value.
pub struct Dpm86<S: embedded_io::Read + embedded_io::Write, D: Delay> {
    transport: Transport<S, D>,
    settle_delay: MillisDurationU32,
}

impl<S: embedded_io::Read + embedded_io::Write, D: Delay> Dpm86<S, D> {
    /// Create a new Dpm86 instance talking through the given transport.
    pub fn new(transport: Transport<S, D>) -> Self {
        Self {
            transport,
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Override the pause between the voltage and current reads of [`Self::get_delivered_power`].
    pub fn with_settle_delay(mut self, settle_delay: MillisDurationU32) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Give back the transport.
    pub fn into_transport(self) -> Transport<S, D> {
        self.transport
    }

    /// Read whether the output is enabled or disabled.
    pub fn get_output_enabled(&mut self) -> Result<State> {
        let value = self.transport.read_register(DpmRegister::OutputEnable)?;
        Ok(State::from(value != 0))
    }

    /// Enable/disable the output.
    pub fn set_output_enabled(&mut self, state: impl Into<State>) -> Result<()> {
        let state: State = state.into();
        self.transport
            .write_register(DpmRegister::OutputEnable, state as u32)
    }

    /// Get the configured regulation mode. (CV or CC.)
    pub fn get_constant_mode(&mut self) -> Result<ConstantMode> {
        let value = self.transport.read_register(DpmRegister::ConstantMode)?;
        ConstantMode::try_from(value)
    }

    pub fn set_constant_mode(&mut self, mode: ConstantMode) -> Result<()> {
        self.transport
            .write_register(DpmRegister::ConstantMode, mode.into())
    }

    /// Return the internal temperature in degrees celsius.
    pub fn get_temperature_celsius(&mut self) -> Result<u32> {
        self.transport.read_register(DpmRegister::Temperature)
    }

    /// Return the measured output voltage in volts.
    pub fn get_voltage(&mut self) -> Result<f64> {
        self.read_scaled(DpmRegister::Voltage, VOLTS)
    }

    /// Return the measured output current in amperes.
    pub fn get_current(&mut self) -> Result<f64> {
        self.read_scaled(DpmRegister::Current, AMPERES)
    }

    /// Return the delivered output power in watts, rounded to two decimals.
    ///
    /// Voltage and current are sampled one settle delay apart.
    pub fn get_delivered_power(&mut self) -> Result<f64> {
        let voltage = self.get_voltage()?;
        self.transport.pause(self.settle_delay);
        let current = self.get_current()?;
        Ok(scaling::round2(voltage * current))
    }

    /// Read back a setting in physical units.
    pub fn get_setting(&mut self, setting: Setting) -> Result<f64> {
        match setting {
            Setting::Voltage => self.read_scaled(DpmRegister::VoltageSetting, VOLTS),
            Setting::Current => self.read_scaled(DpmRegister::CurrentSetting, AMPERES),
            Setting::Power => {
                let voltage = self.read_scaled(DpmRegister::VoltageSetting, VOLTS)?;
                let current = self.read_scaled(DpmRegister::CurrentSetting, AMPERES)?;
                Ok(scaling::round2(voltage * current))
            }
        }
    }

    /// Program a setting in physical units.
    ///
    /// Values outside of the device range are rejected before anything is sent.
    pub fn set_setting(&mut self, setting: Setting, value: f64) -> Result<()> {
        let (register, scale) = match setting {
            Setting::Voltage => (DpmRegister::VoltageSetting, VOLTS),
            Setting::Current => (DpmRegister::CurrentSetting, AMPERES),
            Setting::Power => return Err(Error::ReadOnlySetting(setting)),
        };
        let ticks = Self::validate(setting, register, scale, value)?;
        self.transport.write_register(register, ticks)
    }

    fn read_scaled(&mut self, register: DpmRegister, scale: Scale) -> Result<f64> {
        let ticks = self.transport.read_register(register)?;
        Ok(scale.to_physical(ticks))
    }

    fn validate(setting: Setting, register: DpmRegister, scale: Scale, value: f64) -> Result<u32> {
        // Only called for writable registers, which all declare bounds.
        let (min, max) = register.write_bounds().unwrap_or((0, 0));
        let out_of_range = || Error::SettingOutOfRange {
            setting,
            value,
            min: scale.to_physical(min),
            max: scale.to_physical(max),
        };

        let ticks = scale.to_ticks(value).ok_or_else(out_of_range)?;
        if ticks < i64::from(min) || ticks > i64::from(max) {
            return Err(out_of_range());
        }
        u32::try_from(ticks).map_err(|_| out_of_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::DeviceAddress,
        mock_serial::{MockSerial, RecordingDelay},
        transport::RetryPolicy,
    };

    fn psu(mock: MockSerial) -> (Dpm86<MockSerial, RecordingDelay>, RecordingDelay) {
        let delay = RecordingDelay::new();
        let transport = Transport::new(
            mock,
            delay.clone(),
            DeviceAddress::default(),
            RetryPolicy::default(),
        );
        (Dpm86::new(transport), delay)
    }

    fn written(psu: Dpm86<MockSerial, RecordingDelay>) -> String {
        psu.into_transport().release().written_text()
    }

    #[test]
    fn test_read_output_voltage() {
        let mut mock = MockSerial::new();
        mock.push_value(2550);
        let (mut psu, _) = psu(mock);

        assert_eq!(psu.get_voltage(), Ok(25.5));
        assert_eq!(written(psu), ":01r30=0,,\n");
    }

    #[test]
    fn test_read_output_current() {
        let mut mock = MockSerial::new();
        mock.push_value(2000);
        let (mut psu, _) = psu(mock);

        assert_eq!(psu.get_current(), Ok(2.0));
        assert_eq!(written(psu), ":01r31=0,,\n");
    }

    #[test]
    fn test_delivered_power_waits_between_reads() {
        let mut mock = MockSerial::new();
        mock.push_value(2550);
        mock.push_value(2000);
        let (mut psu, delay) = psu(mock);

        assert_eq!(psu.get_delivered_power(), Ok(51.0));
        assert_eq!(delay.recorded(), vec![200]);
        assert_eq!(written(psu), ":01r30=0,,\n:01r31=0,,\n");
    }

    #[test]
    fn test_delivered_power_fails_on_failed_read() {
        let mut mock = MockSerial::new();
        mock.push_value(2550);
        // Current read never answered.
        let (mut psu, _) = psu(mock);

        let err = psu.get_delivered_power().unwrap_err();
        assert!(matches!(err, Error::ReadTimeout { .. }));
    }

    #[test]
    fn test_read_failure_is_not_a_number() {
        let mut mock = MockSerial::new();
        for _ in 0..5 {
            mock.push_response(":01r30=ERR.\r\n");
        }
        let (mut psu, _) = psu(mock);

        assert!(psu.get_voltage().unwrap_err().is_transport());
    }

    #[test]
    fn test_write_current_setting() {
        let mut mock = MockSerial::new();
        mock.push_ack();
        let (mut psu, _) = psu(mock);

        psu.set_setting(Setting::Current, 3.96).unwrap();
        assert_eq!(written(psu), ":01w11=3960,,\n");
    }

    #[test]
    fn test_write_voltage_setting_truncates() {
        let mut mock = MockSerial::new();
        mock.push_ack();
        let (mut psu, _) = psu(mock);

        psu.set_setting(Setting::Voltage, 25.509).unwrap();
        assert_eq!(written(psu), ":01w10=2550,,\n");
    }

    #[test]
    fn test_setting_limits_inclusive() {
        let mut mock = MockSerial::new();
        mock.push_ack();
        mock.push_ack();
        mock.push_ack();
        let (mut psu, _) = psu(mock);

        psu.set_setting(Setting::Voltage, 29.0).unwrap();
        psu.set_setting(Setting::Current, 9.0).unwrap();
        psu.set_setting(Setting::Current, 0.0).unwrap();
        assert_eq!(written(psu), ":01w10=2900,,\n:01w11=9000,,\n:01w11=0,,\n");
    }

    #[test]
    fn test_out_of_range_setting_never_sent() {
        let (mut psu, _) = psu(MockSerial::new());

        assert_eq!(
            psu.set_setting(Setting::Voltage, 29.01),
            Err(Error::SettingOutOfRange {
                setting: Setting::Voltage,
                value: 29.01,
                min: 0.0,
                max: 29.0,
            })
        );
        assert!(matches!(
            psu.set_setting(Setting::Current, -0.5),
            Err(Error::SettingOutOfRange { .. })
        ));
        assert!(matches!(
            psu.set_setting(Setting::Current, f64::NAN),
            Err(Error::SettingOutOfRange { .. })
        ));
        assert_eq!(
            psu.set_setting(Setting::Power, 100.0),
            Err(Error::ReadOnlySetting(Setting::Power))
        );
        assert!(written(psu).is_empty());
    }

    #[test]
    fn test_get_settings() {
        let mut mock = MockSerial::new();
        mock.push_value(2550);
        mock.push_value(2550);
        mock.push_value(2550);
        mock.push_value(2000);
        let (mut psu, _) = psu(mock);

        assert_eq!(psu.get_setting(Setting::Voltage), Ok(25.5));
        assert_eq!(psu.get_setting(Setting::Current), Ok(2.55));
        assert_eq!(psu.get_setting(Setting::Power), Ok(51.0));
        assert_eq!(
            written(psu),
            ":01r10=0,,\n:01r11=0,,\n:01r10=0,,\n:01r11=0,,\n"
        );
    }

    #[test]
    fn test_output_and_mode() {
        let mut mock = MockSerial::new();
        mock.push_ack();
        mock.push_value(1);
        mock.push_ack();
        mock.push_value(1);
        mock.push_value(5);
        mock.push_value(41);
        let (mut psu, _) = psu(mock);

        psu.set_output_enabled(true).unwrap();
        assert_eq!(psu.get_output_enabled(), Ok(State::On));
        psu.set_constant_mode(ConstantMode::Current).unwrap();
        assert_eq!(psu.get_constant_mode(), Ok(ConstantMode::Current));
        assert_eq!(
            psu.get_constant_mode(),
            Err(Error::InvalidResponse {
                register: DpmRegister::ConstantMode,
                value: 5,
            })
        );
        assert_eq!(psu.get_temperature_celsius(), Ok(41));
        assert_eq!(
            written(psu),
            ":01w12=1,,\n:01r12=0,,\n:01w32=1,,\n:01r32=0,,\n:01r32=0,,\n:01r33=0,,\n"
        );
    }
}
