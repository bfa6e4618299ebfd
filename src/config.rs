//! Command-line configuration for the `ebusd` binary.
//!
//! Grounded in the corpus's `clap`-derive convention for serial-daemon
//! CLIs (e.g. `ttytee`'s `Args`). No baud-rate flag: the engine's timing
//! constants are calibrated for 2400 baud only.

use std::path::PathBuf;

use clap::Parser;

const DEFAULT_SIGNAL_TIMEOUT_MS: u64 = 1000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Serial device the bus adapter is attached to.
    #[arg(long, value_name = "PATH")]
    pub device: PathBuf,

    /// How long to wait for bus activity before reporting loss of signal.
    #[arg(long, default_value_t = DEFAULT_SIGNAL_TIMEOUT_MS, value_name = "MS")]
    pub signal_timeout_ms: u64,

    /// Log the drained symbol history on timeout or resync.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub history_dump: bool,

    /// Increase log verbosity; may be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity; may be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Args {
    /// The effective `log` level after folding `-v`/`-q` onto the default
    /// (`Info`).
    pub fn log_level(&self) -> log::LevelFilter {
        let base = log::LevelFilter::Info as i8;
        let level = (base + self.verbose as i8 - self.quiet as i8)
            .clamp(log::LevelFilter::Off as i8, log::LevelFilter::Trace as i8);
        // LevelFilter has no safe int->variant conversion; walk the table.
        const LEVELS: [log::LevelFilter; 6] = [
            log::LevelFilter::Off,
            log::LevelFilter::Error,
            log::LevelFilter::Warn,
            log::LevelFilter::Info,
            log::LevelFilter::Debug,
            log::LevelFilter::Trace,
        ];
        LEVELS[level as usize]
    }

    pub fn signal_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.signal_timeout_ms)
    }
}
