//! Grid power consumption readings.
//!
//! The controller only needs a signed watt figure per sample: positive while importing from the
//! grid, negative while exporting.

use std::time::Duration;

use thiserror::Error;

/// Why a consumption sample is unavailable.
#[derive(Error, Debug)]
pub enum MeteringError {
    #[error("metering request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metering service returned status {0}")]
    Status(u16),
    #[error("unparseable metering reading '{0}'")]
    Parse(String),
}

/// Source of power consumption samples.
pub trait PowerMeter {
    /// Take one sample of the current grid consumption in whole watts.
    fn sample(&mut self) -> Result<i32, MeteringError>;
}

/// Reads the current value of a power channel from a volkszaehler.org middleware.
pub struct VolkszaehlerMeter {
    client: reqwest::blocking::Client,
    url: String,
}

impl VolkszaehlerMeter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, MeteringError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Data URL of `channel` on the middleware at `host`, asking for the latest value.
    pub fn channel_url(host: &str, channel: &str) -> String {
        format!("http://{host}/middleware/data/{channel}.txt?from=now")
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PowerMeter for VolkszaehlerMeter {
    fn sample(&mut self) -> Result<i32, MeteringError> {
        let response = self.client.get(&self.url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeteringError::Status(status.as_u16()));
        }
        parse_reading(&response.text()?)
    }
}

/// Parse a plain text reading such as `-34.56 W` into whole watts, truncating towards zero.
pub fn parse_reading(body: &str) -> Result<i32, MeteringError> {
    let trimmed = body.trim();
    let number = trimmed
        .strip_suffix('W')
        .map(str::trim_end)
        .unwrap_or(trimmed);

    let watts: f64 = number
        .parse()
        .map_err(|_| MeteringError::Parse(trimmed.to_owned()))?;
    if !watts.is_finite() || watts.abs() > f64::from(i32::MAX) {
        return Err(MeteringError::Parse(trimmed.to_owned()));
    }
    Ok(watts.trunc() as i32)
}
