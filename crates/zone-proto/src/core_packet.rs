//! Core packet framing: telling a core packet from an application packet,
//! and decoding each recognized core subtype's payload.

use crate::cursor::{write_u32, write_u8, Cursor};
use crate::{CORE_PACKET_MARKER, MAX_GROUPED_ELEMENT};

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum ProtoError {
    #[error("datagram shorter than its own header")]
    Truncated,
    #[error("empty datagram")]
    Empty,
    #[error("unrecognized core subtype {0:#04x}")]
    UnknownSubtype(u8),
    #[error("application type byte {0:#04x} outside 0x01..=0x3F")]
    BadApplicationType(u8),
    #[error("grouped element length {0} exceeds {max}", max = MAX_GROUPED_ELEMENT)]
    GroupedElementTooLarge(usize),
}

/// The recognized core packet subtypes, second byte after the `0x00` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoreSubtype {
    KeyInit = 0x01,
    KeyResponse = 0x02,
    Reliable = 0x03,
    Ack = 0x04,
    TimeSyncRequest = 0x05,
    TimeSyncResponse = 0x06,
    Disconnect = 0x07,
    BigDataContinue = 0x08,
    BigDataFinal = 0x09,
    Sized = 0x0A,
    CancelSizedRequest = 0x0B,
    CancelSizedAck = 0x0C,
    Grouped = 0x0E,
    ContinuumKeyResponse = 0x13,
}

impl CoreSubtype {
    fn from_byte(b: u8) -> Result<Self, ProtoError> {
        use CoreSubtype::*;
        Ok(match b {
            0x01 => KeyInit,
            0x02 => KeyResponse,
            0x03 => Reliable,
            0x04 => Ack,
            0x05 => TimeSyncRequest,
            0x06 => TimeSyncResponse,
            0x07 => Disconnect,
            0x08 => BigDataContinue,
            0x09 => BigDataFinal,
            0x0A => Sized,
            0x0B => CancelSizedRequest,
            0x0C => CancelSizedAck,
            0x0E => Grouped,
            0x13 => ContinuumKeyResponse,
            other => return Err(ProtoError::UnknownSubtype(other)),
        })
    }
}

/// A decoded core packet, borrowing payload bytes from the original datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorePacket<'a> {
    KeyInit(&'a [u8]),
    KeyResponse(&'a [u8]),
    Reliable { seqnum: u32, inner: &'a [u8] },
    Ack { seqnum: u32 },
    TimeSyncRequest { time: u32, pkt_sent: u32, pkt_recvd: u32 },
    TimeSyncResponse(&'a [u8]),
    Disconnect,
    BigData { is_final: bool, bytes: &'a [u8] },
    Sized { total_len: u32, bytes: &'a [u8] },
    CancelSizedRequest,
    CancelSizedAck,
    Grouped(Vec<&'a [u8]>),
    ContinuumKeyResponse(&'a [u8]),
}

/// Top-level classification of a received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPacket<'a> {
    Core(CorePacket<'a>),
    Application { type_id: u8, payload: &'a [u8] },
}

/// Classify and decode one datagram. Malformed datagrams are reported as
/// `ProtoError`, never panics — callers log-and-drop malformed datagrams.
pub fn parse_datagram(data: &[u8]) -> Result<ParsedPacket<'_>, ProtoError> {
    if data.is_empty() {
        return Err(ProtoError::Empty);
    }
    if data[0] == CORE_PACKET_MARKER {
        if data.len() < 2 {
            return Err(ProtoError::Truncated);
        }
        let subtype = CoreSubtype::from_byte(data[1])?;
        let core = decode_core(subtype, &data[2..])?;
        Ok(ParsedPacket::Core(core))
    } else if (0x01..=0x3F).contains(&data[0]) {
        Ok(ParsedPacket::Application {
            type_id: data[0],
            payload: &data[1..],
        })
    } else {
        Err(ProtoError::BadApplicationType(data[0]))
    }
}

fn decode_core(subtype: CoreSubtype, rest: &[u8]) -> Result<CorePacket<'_>, ProtoError> {
    let mut cur = Cursor::new(rest);
    Ok(match subtype {
        CoreSubtype::KeyInit => CorePacket::KeyInit(cur.rest()),
        CoreSubtype::KeyResponse => CorePacket::KeyResponse(cur.rest()),
        CoreSubtype::Reliable => {
            let seqnum = cur.read_u32()?;
            CorePacket::Reliable { seqnum, inner: cur.rest() }
        }
        CoreSubtype::Ack => CorePacket::Ack { seqnum: cur.read_u32()? },
        CoreSubtype::TimeSyncRequest => CorePacket::TimeSyncRequest {
            time: cur.read_u32()?,
            pkt_sent: cur.read_u32()?,
            pkt_recvd: cur.read_u32()?,
        },
        CoreSubtype::TimeSyncResponse => CorePacket::TimeSyncResponse(cur.rest()),
        CoreSubtype::Disconnect => CorePacket::Disconnect,
        CoreSubtype::BigDataContinue => CorePacket::BigData { is_final: false, bytes: cur.rest() },
        CoreSubtype::BigDataFinal => CorePacket::BigData { is_final: true, bytes: cur.rest() },
        CoreSubtype::Sized => {
            let total_len = cur.read_u32()?;
            CorePacket::Sized { total_len, bytes: cur.rest() }
        }
        CoreSubtype::CancelSizedRequest => CorePacket::CancelSizedRequest,
        CoreSubtype::CancelSizedAck => CorePacket::CancelSizedAck,
        CoreSubtype::Grouped => CorePacket::Grouped(decode_grouped(&mut cur)?),
        CoreSubtype::ContinuumKeyResponse => CorePacket::ContinuumKeyResponse(cur.rest()),
    })
}

fn decode_grouped<'a>(cur: &mut Cursor<'a>) -> Result<Vec<&'a [u8]>, ProtoError> {
    let mut elements = Vec::new();
    while cur.remaining() > 0 {
        let len = cur.read_u8()? as usize;
        if len > MAX_GROUPED_ELEMENT {
            return Err(ProtoError::GroupedElementTooLarge(len));
        }
        elements.push(cur.read_bytes(len)?);
    }
    Ok(elements)
}

/// Encode an ack (`00 04 <seqnum>`).
pub fn encode_ack(seqnum: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6);
    write_u8(&mut buf, CORE_PACKET_MARKER);
    write_u8(&mut buf, CoreSubtype::Ack as u8);
    write_u32(&mut buf, seqnum);
    buf
}

/// Encode a reliable wrapper (`00 03 <seqnum> <inner>`).
pub fn encode_reliable(seqnum: u32, inner: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + inner.len());
    write_u8(&mut buf, CORE_PACKET_MARKER);
    write_u8(&mut buf, CoreSubtype::Reliable as u8);
    write_u32(&mut buf, seqnum);
    buf.extend_from_slice(inner);
    buf
}

/// Encode a disconnect notice (`00 07`).
pub fn encode_disconnect() -> Vec<u8> {
    vec![CORE_PACKET_MARKER, CoreSubtype::Disconnect as u8]
}

/// Encode a cancel-sized ack (`00 0C`).
pub fn encode_cancel_sized_ack() -> Vec<u8> {
    vec![CORE_PACKET_MARKER, CoreSubtype::CancelSizedAck as u8]
}

/// Encode a cancel-sized request (`00 0B`).
pub fn encode_cancel_sized_request() -> Vec<u8> {
    vec![CORE_PACKET_MARKER, CoreSubtype::CancelSizedRequest as u8]
}

/// Encode a sized-send chunk (`00 0A <total_len> <bytes>`).
pub fn encode_sized(total_len: u32, bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + bytes.len());
    write_u8(&mut buf, CORE_PACKET_MARKER);
    write_u8(&mut buf, CoreSubtype::Sized as u8);
    write_u32(&mut buf, total_len);
    buf.extend_from_slice(bytes);
    buf
}

/// Encode a big-data continuation/final chunk.
pub fn encode_big_data(is_final: bool, bytes: &[u8]) -> Vec<u8> {
    let subtype = if is_final { CoreSubtype::BigDataFinal } else { CoreSubtype::BigDataContinue };
    let mut buf = Vec::with_capacity(2 + bytes.len());
    write_u8(&mut buf, CORE_PACKET_MARKER);
    write_u8(&mut buf, subtype as u8);
    buf.extend_from_slice(bytes);
    buf
}

/// Encode a time-sync response (`00 06 <client_time> <server_time>`).
pub fn encode_time_sync_response(client_time: u32, server_time: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    write_u8(&mut buf, CORE_PACKET_MARKER);
    write_u8(&mut buf, CoreSubtype::TimeSyncResponse as u8);
    write_u32(&mut buf, client_time);
    write_u32(&mut buf, server_time);
    buf
}

/// Encode a grouped envelope. Caller is responsible for keeping the total
/// size within `MAX_DATAGRAM` and each element within `MAX_GROUPED_ELEMENT`
/// (the send sweep's grouping step does this as it coalesces datagrams).
pub fn encode_grouped(elements: &[&[u8]]) -> Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::new();
    write_u8(&mut buf, CORE_PACKET_MARKER);
    write_u8(&mut buf, CoreSubtype::Grouped as u8);
    for elem in elements {
        if elem.len() > MAX_GROUPED_ELEMENT {
            return Err(ProtoError::GroupedElementTooLarge(elem.len()));
        }
        write_u8(&mut buf, elem.len() as u8);
        buf.extend_from_slice(elem);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_packet_classified_by_first_byte() {
        let datagram = [0x05u8, 1, 2, 3];
        let parsed = parse_datagram(&datagram).unwrap();
        assert_eq!(parsed, ParsedPacket::Application { type_id: 0x05, payload: &[1, 2, 3] });
    }

    #[test]
    fn reliable_core_packet_round_trips() {
        let wire = encode_reliable(7, b"alpha");
        let parsed = parse_datagram(&wire).unwrap();
        assert_eq!(
            parsed,
            ParsedPacket::Core(CorePacket::Reliable { seqnum: 7, inner: b"alpha" })
        );
    }

    #[test]
    fn ack_round_trips() {
        let wire = encode_ack(42);
        assert_eq!(parse_datagram(&wire).unwrap(), ParsedPacket::Core(CorePacket::Ack { seqnum: 42 }));
    }

    #[test]
    fn grouped_inbound_yields_three_elements() {
        // three sub-elements of differing lengths, back to back
        let datagram: Vec<u8> = vec![
            0x00, 0x0E, 0x03, 0x00, 0x01, 0x02, 0x02, 0x03, 0x04, 0x04, 0x05, 0x06, 0x07, 0x08,
        ];
        let parsed = parse_datagram(&datagram).unwrap();
        match parsed {
            ParsedPacket::Core(CorePacket::Grouped(elems)) => {
                assert_eq!(elems, vec![&[0u8, 1, 2][..], &[3, 4][..], &[5, 6, 7, 8][..]]);
            }
            other => panic!("expected grouped packet, got {other:?}"),
        }
    }

    #[test]
    fn unknown_subtype_is_an_error_not_a_panic() {
        let datagram = [0x00u8, 0xFF];
        assert_eq!(parse_datagram(&datagram), Err(ProtoError::UnknownSubtype(0xFF)));
    }

    #[test]
    fn grouped_element_over_limit_is_rejected() {
        let big = vec![0u8; 256];
        assert_eq!(
            encode_grouped(&[&big]),
            Err(ProtoError::GroupedElementTooLarge(256))
        );
    }

    #[test]
    fn empty_datagram_is_an_error() {
        assert_eq!(parse_datagram(&[]), Err(ProtoError::Empty));
    }
}
