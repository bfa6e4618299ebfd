//! The on-wire symbol alphabet and the address predicates that partition it.

/// A single byte on the eBUS wire, either raw or already escape-folded.
pub type Symbol = u8;

/// Idle / synchronization byte. Marks gaps between telegrams and grants the
/// right to transmit.
pub const SYN: Symbol = 0xAA;

/// Escape byte, used to encode literal `ESC` and `SYN` values inside a body.
pub const ESC: Symbol = 0xA9;

/// Positive acknowledgement symbol.
pub const ACK: Symbol = 0x00;

/// Negative acknowledgement symbol.
pub const NACK: Symbol = 0xFF;

/// The broadcast destination address.
pub const BROADCAST: Symbol = 0xFE;

/// Acknowledgement status as observed on the wire. `None` is the default when
/// no ack is expected (broadcasts) or none was observed before the bus went
/// quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Acknowledgement {
    Ack,
    Nack,
    None,
}

impl Acknowledgement {
    /// Map a symbol observed in the ack slot to its acknowledgement meaning.
    pub fn from_symbol(symbol: Symbol) -> Self {
        match symbol {
            ACK => Acknowledgement::Ack,
            NACK => Acknowledgement::Nack,
            _ => Acknowledgement::None,
        }
    }

    /// The symbol a master/slave would put on the wire for this status.
    ///
    /// `None` has no wire representation; callers that need to emit one
    /// (e.g. a synthesized master-ack) should only do so for `Ack`/`Nack`.
    pub fn to_symbol(self) -> Option<Symbol> {
        match self {
            Acknowledgement::Ack => Some(ACK),
            Acknowledgement::Nack => Some(NACK),
            Acknowledgement::None => None,
        }
    }
}

/// Both nibbles of `symbol` are one less than a power of two.
fn is_power_of_two_minus_one_nibble(nibble: u8) -> bool {
    (nibble + 1).count_ones() == 1
}

/// A master may acquire the bus and initiate a telegram.
pub fn is_master_address(symbol: Symbol) -> bool {
    let priority_class = symbol & 0x0F;
    let sub_address = (symbol & 0xF0) >> 4;
    is_power_of_two_minus_one_nibble(priority_class)
        && is_power_of_two_minus_one_nibble(sub_address)
}

/// The reserved all-slaves destination.
pub fn is_broadcast_address(symbol: Symbol) -> bool {
    symbol == BROADCAST
}

/// Neither a master nor the broadcast address.
pub fn is_slave_address(symbol: Symbol) -> bool {
    !is_broadcast_address(symbol) && !is_master_address(symbol)
}
