//! # AM PDU wire format
//!
//! Every PDU starts with a one-byte kind tag. Multi-byte fields are
//! big-endian.
//!
//! ## Data
//!
//! ```text
//! 0    1       5       9    11      15      19   20   21    23 (BYTE)
//! +----+-------+-------+----+-------+-------+----+----+-----+
//! |kind|  seq  | unit  |tot | first | last  |retx|link| len |
//! +----+-------+-------+----+-------+-------+----+----+-----+
//! |                        payload                          |
//! +---------------------------------------------------------+
//! ```
//!
//! ## AdvanceRequest / AdvanceAck
//!
//! ```text
//! 0    1       5       9 (BYTE)
//! +----+-------+-------+
//! |kind|  seq  | floor |
//! +----+-------+-------+
//! ```
//!
//! ## CumulativeAck
//!
//! ```text
//! 0    1       5 (BYTE)
//! +----+-------+
//! |kind|  ack  |
//! +----+-------+
//! ```
//!
//! ## BitmapAck
//!
//! ```text
//! 0    1       5       9    11        (BYTE)
//! +----+-------+-------+----+--------+
//! |kind|  ack  | base  |bits| bitmap |
//! +----+-------+-------+----+--------+
//! ```
//!
//! # Invariants
//!
//! - `len` (`Data`) should not be `0`
//! - `first <= seq <= last` and `last - first + 1 == tot` (`Data`)

mod pdu;

pub use pdu::*;

#[derive(Debug, PartialEq, Eq)]
pub enum DecodingError {
    Decoding { field: &'static str },
}

#[derive(Debug)]
pub enum EncodingError {
    NotEnoughSpace,
}
