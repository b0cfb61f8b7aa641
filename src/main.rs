use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use fugit::MillisDurationU32;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dpm86_diverter::{
    config::Config,
    control::Controller,
    metering::VolkszaehlerMeter,
    psu::Dpm86,
    serial,
    transport::{StdDelay, Transport},
};

/// Divert surplus solar power into a battery inverter through a DPM86xx supply.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "DPM86_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port of the supply, overrides the configuration.
    #[arg(short, long)]
    port: Option<String>,

    /// Log filter, e.g. `debug` or `dpm86_diverter=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(port) = args.port {
        config.serial.port = port;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("parsing log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;
    let address = config
        .address()
        .ok_or_else(|| anyhow!("invalid device address {}", config.serial.address))?;

    let link = serial::open(&config.serial, config.serial_timeout())
        .with_context(|| format!("opening serial port {}", config.serial.port))?;
    info!(
        port = link.name().as_deref().unwrap_or(&config.serial.port),
        baud = config.serial.baud_rate,
        "serial port open"
    );

    let transport = Transport::new(link, StdDelay, address, config.retry_policy());
    info!(address = %transport.address(), "talking to supply");
    let psu = Dpm86::new(transport)
        .with_settle_delay(MillisDurationU32::millis(config.supply.settle_ms));

    let url = VolkszaehlerMeter::channel_url(&config.metering.host, &config.metering.channel);
    let meter = VolkszaehlerMeter::new(url, config.metering_timeout())
        .context("building metering client")?;
    info!(url = meter.url(), "metering");

    let mut controller = Controller::new(psu, meter, StdDelay, config);
    if let Err(e) = controller.initialize() {
        error!(error = %e, "supply initialization incomplete, continuing");
    }
    controller.run()
}
