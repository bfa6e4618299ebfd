use std::collections::VecDeque;

use clap::Parser;
use log::info;

use ebusd_core::arbitration;
use ebusd_core::config::Args;
use ebusd_core::framer::Framer;
use ebusd_core::serial::SerialPort;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level())
        .init();

    info!("opening {}", args.device.display());
    let port = SerialPort::open(&args.device);
    let framer = Framer::new(port);

    let result = arbitration::run(
        framer,
        VecDeque::new(),
        args.signal_timeout(),
        args.history_dump,
        |telegram| {
            info!(
                "{:#04x} -> {:#04x} [{:#04x}{:#04x}] ack={} crc_ok={}",
                telegram.source,
                telegram.destination,
                telegram.primary,
                telegram.secondary,
                telegram.ack,
                telegram.crc_ok
            );
        },
        |has_signal| info!("signal: {has_signal}"),
    );

    Err(Box::new(result.unwrap_err()))
}
