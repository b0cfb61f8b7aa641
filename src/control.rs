//! The diversion control loop.
//!
//! Each cycle first *tracks* grid consumption over a window of samples, reducing them to one
//! recency weighted delta, and then *adapts* the supply's current setting so the inverter covers
//! that delta. The loop never terminates on its own.

use fugit::MillisDurationU32;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, MeteringFailurePolicy},
    error::Error,
    metering::{MeteringError, PowerMeter},
    psu::Dpm86,
    register::{Setting, State},
    scaling::round2,
    status::{StatusFile, StatusSnapshot},
    transport::Delay,
};

/// Why a cycle ended without adapting the supply.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("consumption sample unavailable: {0}")]
    Metering(#[from] MeteringError),
    #[error("supply: {0}")]
    Device(#[from] Error),
    #[error("writing status snapshot: {0}")]
    Status(#[from] std::io::Error),
}

/// The setpoint derived for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlDecision {
    /// Amperes.
    pub target_current: f64,
    /// Volts. Always the startup voltage.
    pub target_voltage: f64,
    /// Watts, as delivered at `target_voltage` and the (clamped) `target_current`.
    pub target_power: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// The delta was too small to act on.
    Skipped { delta: i32 },
    /// A new current setting was derived. `committed` is false when the change was too small to write.
    Adapted {
        delta: i32,
        decision: ControlDecision,
        committed: bool,
    },
}

/// Limits applied when turning a power delta into a current setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointLimits {
    pub min_power: f64,
    pub current_max: f64,
}

/// `1 + 2 + ... + n`, the sum of the sample weights in a window of `n`.
pub const fn triangular(n: u32) -> i64 {
    let n = n as i64;
    n * (n + 1) / 2
}

/// Derive the setpoint that makes the supply deliver `delivered_power + delta` watts.
///
/// The requested power is floored at `limits.min_power` before it is converted to a current,
/// and the current is clamped to `[0, limits.current_max]`. The reported power reflects the
/// clamped current.
pub fn decide(
    delivered_power: f64,
    delta: i32,
    target_voltage: f64,
    limits: SetpointLimits,
) -> ControlDecision {
    let mut target_power = round2(delivered_power + f64::from(delta));
    if target_power < limits.min_power {
        target_power = limits.min_power;
    }

    let target_current = round2(target_power / target_voltage).clamp(0.0, limits.current_max);

    ControlDecision {
        target_current,
        target_voltage,
        target_power: round2(target_voltage * target_current),
    }
}

/// Runs the tracking/adapting cycle against one supply and one consumption meter.
pub struct Controller<S, D, M>
where
    S: embedded_io::Read + embedded_io::Write,
    D: Delay,
    M: PowerMeter,
{
    psu: Dpm86<S, D>,
    meter: M,
    clock: D,
    status: Option<StatusFile>,
    config: Config,
    /// Window size for the next tracking phase.
    next_window: u32,
}

impl<S, D, M> Controller<S, D, M>
where
    S: embedded_io::Read + embedded_io::Write,
    D: Delay,
    M: PowerMeter,
{
    /// `clock` paces the consumption samples.
    pub fn new(psu: Dpm86<S, D>, meter: M, clock: D, config: Config) -> Self {
        let status = config.status.path.clone().map(StatusFile::new);
        Self {
            psu,
            meter,
            clock,
            status,
            next_window: config.control.initial_window,
            config,
        }
    }

    pub fn psu(&mut self) -> &mut Dpm86<S, D> {
        &mut self.psu
    }

    pub fn into_parts(self) -> (Dpm86<S, D>, M) {
        (self.psu, self.meter)
    }

    /// Bring the supply into a known state: output off, startup voltage and current, regulation
    /// mode, output on.
    ///
    /// Every step is attempted even if an earlier one fails. The first error is returned.
    pub fn initialize(&mut self) -> Result<(), Error> {
        let supply = self.config.supply.clone();
        let mut first_error = None;
        let mut check = |step: &str, result: Result<(), Error>| match result {
            Ok(()) => info!("{step}: ok"),
            Err(e) => {
                warn!(error = %e, "{step} failed");
                first_error.get_or_insert(e);
            }
        };

        check("turning output off", self.psu.set_output_enabled(State::Off));
        check(
            "setting voltage",
            self.psu.set_setting(Setting::Voltage, supply.initial_voltage),
        );
        check(
            "setting current",
            self.psu.set_setting(Setting::Current, supply.initial_current),
        );
        check(
            "setting regulation mode",
            self.psu.set_constant_mode(supply.constant_mode),
        );
        check("turning output on", self.psu.set_output_enabled(State::On));

        first_error.map_or(Ok(()), Err)
    }

    /// Run cycles forever. Failed cycles are logged and the next one starts.
    pub fn run(&mut self) -> ! {
        loop {
            match self.run_cycle() {
                Ok(CycleOutcome::Skipped { delta }) => {
                    debug!(delta, "delta too small, setpoint unchanged");
                }
                Ok(CycleOutcome::Adapted { .. }) => {}
                Err(CycleError::Metering(e)) => {
                    warn!(error = %e, "tracking aborted");
                    // Don't hammer an unreachable meter.
                    self.clock.delay(self.sample_interval());
                }
                Err(CycleError::Device(e)) if e.is_transport() => {
                    warn!(error = %e, "communication with supply failed, cycle aborted");
                }
                Err(e) => warn!(error = %e, "cycle aborted"),
            }
        }
    }

    /// One tracking phase, followed by an adapting phase if the delta is large enough.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let window = self.next_window;
        // The window only ever differs for the first cycle.
        self.next_window = self.config.control.window;

        info!(window, "new cycle");
        let delta = self.estimate_delta(window)?;
        if delta.abs() < self.config.control.min_delta {
            return Ok(CycleOutcome::Skipped { delta });
        }

        let (decision, committed) = self.apply_setpoint(delta)?;
        self.emit_status()?;
        Ok(CycleOutcome::Adapted {
            delta,
            decision,
            committed,
        })
    }

    /// Track consumption over `window` accepted samples and return the recency weighted average.
    ///
    /// Sample `i` of the window is weighted by `i`. A rise larger than the spike threshold
    /// between two consecutive samples discards the window and starts a new one.
    pub fn estimate_delta(&mut self, window: u32) -> Result<i32, MeteringError> {
        let window = window.max(1);
        let spike_threshold = i64::from(self.config.control.spike_threshold);

        let mut previous = self.sample()?;
        let mut sum = i64::from(previous);
        let mut index = 2;
        debug!(window, sample = previous, "tracking");

        while index <= window {
            self.clock.delay(self.sample_interval());
            let now = self.sample()?;
            let step = i64::from(now) - i64::from(previous);
            debug!(index, sample = now, step, "tracking");

            if step > spike_threshold {
                warn!(step, spike_threshold, "consumption spike, restarting tracking");
                previous = self.sample()?;
                sum = i64::from(previous);
                index = 2;
                continue;
            }

            sum += i64::from(now) * i64::from(index);
            previous = now;
            index += 1;
        }

        // Bounded by the largest sample, so it fits back into an i32.
        let delta = (sum / triangular(window)) as i32;
        info!(delta, "tracked");
        Ok(delta)
    }

    /// Adapt the supply's current setting to cover `delta` watts more (or less) than it delivers now.
    ///
    /// Returns the decision and whether it was written to the supply.
    pub fn apply_setpoint(&mut self, delta: i32) -> Result<(ControlDecision, bool), Error> {
        let delivered_power = self.psu.get_delivered_power()?;

        let voltage_setting = self.psu.get_setting(Setting::Voltage)?;
        let current_setting = self.psu.get_setting(Setting::Current)?;
        let setting_power = round2(voltage_setting * current_setting);

        let supply = &self.config.supply;
        let decision = decide(
            delivered_power,
            delta,
            supply.initial_voltage,
            SetpointLimits {
                min_power: supply.min_power,
                current_max: supply.current_max,
            },
        );

        info!("power to/from grid      : {:7.2} W", f64::from(delta));
        info!(
            "actual battery supply   : {:7.2} W [ setting {:7.2} W, {:5.2} V with {:6.3} A ]",
            delivered_power, setting_power, voltage_setting, current_setting
        );
        info!(
            "target battery supply   : {:7.2} W",
            round2(delivered_power + f64::from(delta))
        );
        info!(
            "corrected battery supply: {:7.2} W [ {:5.2} V with {:6.3} A ]",
            decision.target_power, decision.target_voltage, decision.target_current
        );

        let step = (decision.target_current - current_setting).abs();
        if step < self.config.control.min_current_step {
            info!(step, "change in current setting too small, ignored");
            return Ok((decision, false));
        }

        self.psu
            .set_setting(Setting::Current, decision.target_current)?;
        Ok((decision, true))
    }

    /// Publish the delivered power and the power setting, if a status file is configured.
    pub fn emit_status(&mut self) -> Result<Option<StatusSnapshot>, CycleError> {
        let Some(status) = &self.status else {
            return Ok(None);
        };

        let snapshot = StatusSnapshot {
            delivered_power: self.psu.get_delivered_power()?,
            power_setting: self.psu.get_setting(Setting::Power)?,
        };
        status.write(&snapshot)?;
        debug!(path = %status.path().display(), "status written");
        Ok(Some(snapshot))
    }

    fn sample(&mut self) -> Result<i32, MeteringError> {
        match self.meter.sample() {
            Ok(watts) => Ok(watts),
            Err(e) => match self.config.control.metering_failure {
                MeteringFailurePolicy::AbortWindow => Err(e),
                MeteringFailurePolicy::Sentinel => {
                    warn!(error = %e, "consumption sample unavailable, using sentinel");
                    Ok(MeteringFailurePolicy::SENTINEL_WATTS)
                }
            },
        }
    }

    fn sample_interval(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.config.control.sample_interval_ms)
    }
}
