//! The single-threaded arbitration loop: waits for bus signal, reads
//! telegrams in wire order, and services the outbound queue at SYN
//! boundaries.
//!
//! Grounded in `MessageHandler::run()`: a cooperative loop with no
//! threading, since the bus is strictly serial and gains nothing from it
//! (see §5).

use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::framer::{Framer, TIMEOUT_AUTO_SYN};
use crate::serial::Port;
use crate::symbol::{SYN, is_master_address};
use crate::telegram::{self, SendOutcome, Telegram};

/// Run the arbitration loop until a fatal I/O error closes the port.
///
/// `on_telegram` is invoked for every telegram observed on the wire,
/// whether received or sent by us; `on_signal` is edge-triggered on
/// acquiring or losing the bus.
pub fn run<P: Port>(
    mut framer: Framer<P>,
    mut queue: VecDeque<Telegram>,
    signal_timeout: Duration,
    history_dump: bool,
    mut on_telegram: impl FnMut(&Telegram),
    mut on_signal: impl FnMut(bool),
) -> Result<()> {
    let mut synced = false;
    loop {
        if !synced {
            loop {
                match framer.wait_signal(signal_timeout) {
                    Ok(()) => break,
                    Err(Error::Timeout) => {
                        warn!("no signal within {signal_timeout:?}, still waiting");
                    }
                    Err(e) => return Err(e),
                }
            }
            synced = true;
            on_signal(true);
        }

        match run_synced(&mut framer, &mut queue, &mut on_telegram) {
            Err(Error::Timeout) => {
                warn!("timed out mid-telegram, resynchronizing");
                if history_dump {
                    warn!("history: {:02x?}", framer.drain_history());
                }
                synced = false;
                on_signal(false);
            }
            Err(Error::UnexpectedSyn) => {
                debug!("unexpected SYN mid-telegram, resuming");
                if history_dump {
                    debug!("history: {:02x?}", framer.drain_history());
                }
                // the SYN is already latched as pending; the next poll
                // returns it and the inner loop resynchronizes on its own.
            }
            Err(e) => return Err(e),
            Ok(()) => unreachable!("run_synced only returns on error"),
        }
    }
}

/// The inner loop while the bus is presumed live. Returns only on error:
/// `Timeout`/`UnexpectedSyn` are handled by the caller, anything else
/// (I/O failure) is fatal.
fn run_synced<P: Port>(
    framer: &mut Framer<P>,
    queue: &mut VecDeque<Telegram>,
    on_telegram: &mut impl FnMut(&Telegram),
) -> Result<()> {
    let mut backoff: u8 = 0;
    loop {
        let mut source = Some(SYN);
        while source == Some(SYN) {
            source = framer.poll_symbol(TIMEOUT_AUTO_SYN)?;
            backoff = backoff.saturating_sub(1);
            if backoff == 0
                && source == Some(SYN)
                && let Some(telegram) = queue.front()
            {
                match telegram::try_send(framer, telegram, &mut *on_telegram)? {
                    SendOutcome::Collision { syns } => backoff = syns,
                    SendOutcome::Complete | SendOutcome::Dropped => {
                        queue.pop_front();
                    }
                }
            }
        }

        let Some(source) = source else {
            continue; // idle poll tick, no byte arrived
        };
        if !is_master_address(source) {
            debug!("ignoring non-master byte {source:#04x}");
            continue;
        }
        let telegram = telegram::read_telegram(framer, source, &mut *on_telegram)?;
        on_telegram(&telegram);
    }
}
