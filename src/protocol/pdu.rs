use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::utils::Seq;

use super::DecodingError;

pub const DATA_HDR_LEN: usize = 23;
pub const ADVANCE_REQUEST_LEN: usize = 9;
pub const ADVANCE_ACK_LEN: usize = 9;
pub const CUMULATIVE_ACK_LEN: usize = 5;
pub const BITMAP_ACK_HDR_LEN: usize = 11;

#[derive(IntoPrimitive, TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduKind {
    Data,
    AdvanceRequest,
    AdvanceAck,
    CumulativeAck,
    BitmapAck,
}

/// Radio bearer variant a data fragment travels on. Dispatched with a
/// `match`; there is no behavioral difference inside the AM engine itself.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkKind {
    Cellular,
    D2d,
}

/// Header of a data fragment: its own window sequence number plus the
/// identity and extent of the fragment group it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHdr {
    /// Fragment sequence number in the transmit-window numbering space.
    pub seq: Seq,
    /// Sequence number of the parent unit.
    pub unit: Seq,
    /// Total number of fragments of the parent unit.
    pub total: u16,
    /// Fragment sequence number of the group's first fragment.
    pub first: Seq,
    /// Fragment sequence number of the group's last fragment.
    pub last: Seq,
    /// Transmission counter, informational on the wire.
    pub retx: u8,
    pub link: LinkKind,
}

impl DataHdr {
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.seq == self.first
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.seq == self.last
    }

    /// A whole unit carried by a single fragment.
    #[must_use]
    pub fn is_whole(&self) -> bool {
        self.total == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Data {
        hdr: DataHdr,
        payload: Vec<u8>,
    },
    /// Window-advance request: asks the peer to move its receive floor to
    /// `floor`. `seq` is the request's own counter, independent from the
    /// fragment numbering space.
    AdvanceRequest {
        seq: Seq,
        floor: Seq,
    },
    /// Echo of an accepted (or stale, idempotent) advance request.
    AdvanceAck {
        seq: Seq,
        floor: Seq,
    },
    /// `ack` names the highest contiguous received fragment.
    CumulativeAck {
        ack: Seq,
    },
    /// Cumulative part plus one bit per sequence number starting at `base`.
    BitmapAck {
        ack: Seq,
        base: Seq,
        bits: Vec<bool>,
    },
}

impl Pdu {
    fn check_rep(&self) {
        match self {
            Pdu::Data { hdr, payload } => {
                assert!(!payload.is_empty());
                assert!(hdr.first <= hdr.seq && hdr.seq <= hdr.last);
                assert_eq!(hdr.last.sub_seq(hdr.first) + 1, u32::from(hdr.total));
            }
            Pdu::BitmapAck { bits, .. } => {
                assert!(!bits.is_empty());
                assert!(bits.len() <= usize::from(u16::MAX));
            }
            _ => (),
        }
    }

    #[must_use]
    pub fn kind(&self) -> PduKind {
        match self {
            Pdu::Data { .. } => PduKind::Data,
            Pdu::AdvanceRequest { .. } => PduKind::AdvanceRequest,
            Pdu::AdvanceAck { .. } => PduKind::AdvanceAck,
            Pdu::CumulativeAck { .. } => PduKind::CumulativeAck,
            Pdu::BitmapAck { .. } => PduKind::BitmapAck,
        }
    }

    /// Own sequence number of the PDU: fragment seq for data, request
    /// counter for advance control, cumulative ack value otherwise.
    #[must_use]
    pub fn seq(&self) -> Seq {
        match self {
            Pdu::Data { hdr, .. } => hdr.seq,
            Pdu::AdvanceRequest { seq, .. } => *seq,
            Pdu::AdvanceAck { seq, .. } => *seq,
            Pdu::CumulativeAck { ack } => *ack,
            Pdu::BitmapAck { ack, .. } => *ack,
        }
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        match self {
            Pdu::Data { payload, .. } => DATA_HDR_LEN + payload.len(),
            Pdu::AdvanceRequest { .. } => ADVANCE_REQUEST_LEN,
            Pdu::AdvanceAck { .. } => ADVANCE_ACK_LEN,
            Pdu::CumulativeAck { .. } => CUMULATIVE_ACK_LEN,
            Pdu::BitmapAck { bits, .. } => BITMAP_ACK_HDR_LEN + (bits.len() + 7) / 8,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.check_rep();
        let mut wtr = Vec::with_capacity(self.wire_len());
        wtr.write_u8(self.kind().into()).unwrap();
        match self {
            Pdu::Data { hdr, payload } => {
                wtr.write_u32::<BigEndian>(hdr.seq.to_u32()).unwrap();
                wtr.write_u32::<BigEndian>(hdr.unit.to_u32()).unwrap();
                wtr.write_u16::<BigEndian>(hdr.total).unwrap();
                wtr.write_u32::<BigEndian>(hdr.first.to_u32()).unwrap();
                wtr.write_u32::<BigEndian>(hdr.last.to_u32()).unwrap();
                wtr.write_u8(hdr.retx).unwrap();
                wtr.write_u8(hdr.link.into()).unwrap();
                wtr.write_u16::<BigEndian>(payload.len() as u16).unwrap();
                wtr.extend_from_slice(payload);
            }
            Pdu::AdvanceRequest { seq, floor } | Pdu::AdvanceAck { seq, floor } => {
                wtr.write_u32::<BigEndian>(seq.to_u32()).unwrap();
                wtr.write_u32::<BigEndian>(floor.to_u32()).unwrap();
            }
            Pdu::CumulativeAck { ack } => {
                wtr.write_u32::<BigEndian>(ack.to_u32()).unwrap();
            }
            Pdu::BitmapAck { ack, base, bits } => {
                wtr.write_u32::<BigEndian>(ack.to_u32()).unwrap();
                wtr.write_u32::<BigEndian>(base.to_u32()).unwrap();
                wtr.write_u16::<BigEndian>(bits.len() as u16).unwrap();
                let mut byte = 0u8;
                for (i, &bit) in bits.iter().enumerate() {
                    if bit {
                        byte |= 0x80 >> (i % 8);
                    }
                    if i % 8 == 7 {
                        wtr.write_u8(byte).unwrap();
                        byte = 0;
                    }
                }
                if bits.len() % 8 != 0 {
                    wtr.write_u8(byte).unwrap();
                }
            }
        }
        assert_eq!(wtr.len(), self.wire_len());
        wtr
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, DecodingError> {
        let mut rdr = Cursor::new(buf);
        let kind = rdr
            .read_u8()
            .map_err(|_e| DecodingError::Decoding { field: "kind" })?;
        let kind =
            PduKind::try_from(kind).map_err(|_e| DecodingError::Decoding { field: "kind" })?;
        let this = match kind {
            PduKind::Data => {
                let seq = read_seq(&mut rdr, "seq")?;
                let unit = read_seq(&mut rdr, "unit")?;
                let total = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_e| DecodingError::Decoding { field: "total" })?;
                let first = read_seq(&mut rdr, "first")?;
                let last = read_seq(&mut rdr, "last")?;
                let retx = rdr
                    .read_u8()
                    .map_err(|_e| DecodingError::Decoding { field: "retx" })?;
                let link = rdr
                    .read_u8()
                    .map_err(|_e| DecodingError::Decoding { field: "link" })?;
                let link = LinkKind::try_from(link)
                    .map_err(|_e| DecodingError::Decoding { field: "link" })?;
                let len = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_e| DecodingError::Decoding { field: "len" })?
                    as usize;
                if len == 0 {
                    return Err(DecodingError::Decoding { field: "len" });
                }
                let at = rdr.position() as usize;
                if buf.len() < at + len {
                    return Err(DecodingError::Decoding { field: "payload" });
                }
                let payload = buf[at..at + len].to_vec();
                if total == 0 || last.sub_seq(first) + 1 != u32::from(total) {
                    return Err(DecodingError::Decoding { field: "total" });
                }
                if !(first <= seq && seq <= last) {
                    return Err(DecodingError::Decoding { field: "seq" });
                }
                Pdu::Data {
                    hdr: DataHdr {
                        seq,
                        unit,
                        total,
                        first,
                        last,
                        retx,
                        link,
                    },
                    payload,
                }
            }
            PduKind::AdvanceRequest => Pdu::AdvanceRequest {
                seq: read_seq(&mut rdr, "seq")?,
                floor: read_seq(&mut rdr, "floor")?,
            },
            PduKind::AdvanceAck => Pdu::AdvanceAck {
                seq: read_seq(&mut rdr, "seq")?,
                floor: read_seq(&mut rdr, "floor")?,
            },
            PduKind::CumulativeAck => Pdu::CumulativeAck {
                ack: read_seq(&mut rdr, "ack")?,
            },
            PduKind::BitmapAck => {
                let ack = read_seq(&mut rdr, "ack")?;
                let base = read_seq(&mut rdr, "base")?;
                let bit_len = rdr
                    .read_u16::<BigEndian>()
                    .map_err(|_e| DecodingError::Decoding { field: "bits" })?
                    as usize;
                if bit_len == 0 {
                    return Err(DecodingError::Decoding { field: "bits" });
                }
                let mut bits = Vec::with_capacity(bit_len);
                let mut byte = 0u8;
                for i in 0..bit_len {
                    if i % 8 == 0 {
                        byte = rdr
                            .read_u8()
                            .map_err(|_e| DecodingError::Decoding { field: "bitmap" })?;
                    }
                    bits.push(byte & (0x80 >> (i % 8)) != 0);
                }
                Pdu::BitmapAck { ack, base, bits }
            }
        };
        this.check_rep();
        Ok(this)
    }
}

fn read_seq(rdr: &mut Cursor<&[u8]>, field: &'static str) -> Result<Seq, DecodingError> {
    let n = rdr
        .read_u32::<BigEndian>()
        .map_err(|_e| DecodingError::Decoding { field })?;
    Ok(Seq::from_u32(n))
}
