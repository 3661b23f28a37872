use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::wire::ProtocolError;

// Data-plane flag bits. Exactly one is set per frame.
pub const FLAG_SYN: u8 = 0x01;
pub const FLAG_NORMAL: u8 = 0x02;
pub const FLAG_ACK: u8 = 0x04;

/// Fixed header: destination(4) source(4) seqno(4) ackno(4) flags(1) total_size(4).
pub const DATA_HEADER_LEN: usize = 21;

/// The chunk size data-bearing frames carry. A transfer is cut into payloads of
///  at most this many bytes; there is no fragmentation above it.
pub const MAX_PAYLOAD_LEN: usize = 5000;

/// A data-plane frame. `total_size` is meaningful only on SYN frames, where it
///  carries the full length of the file being transferred; the payload is empty
///  iff the ACK flag is set.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DataFrame {
    pub destination: Ipv4Addr,
    pub source: Ipv4Addr,
    pub seqno: u32,
    pub ackno: u32,
    pub flags: u8,
    pub total_size: u32,
    pub payload: Bytes,
}

impl DataFrame {
    /// The opening frame of a transfer. Sequence number 0, carries the total
    ///  file size alongside the first payload chunk.
    pub fn syn(destination: Ipv4Addr, source: Ipv4Addr, payload: Bytes, total_size: u32) -> DataFrame {
        DataFrame {
            destination,
            source,
            seqno: 0,
            ackno: 0,
            flags: FLAG_SYN,
            total_size,
            payload,
        }
    }

    pub fn normal(destination: Ipv4Addr, source: Ipv4Addr, seqno: u32, payload: Bytes) -> DataFrame {
        DataFrame {
            destination,
            source,
            seqno,
            ackno: 0,
            flags: FLAG_NORMAL,
            total_size: 0,
            payload,
        }
    }

    pub fn ack(destination: Ipv4Addr, source: Ipv4Addr, ackno: u32) -> DataFrame {
        DataFrame {
            destination,
            source,
            seqno: 0,
            ackno,
            flags: FLAG_ACK,
            total_size: 0,
            payload: Bytes::new(),
        }
    }

    pub fn is_syn(&self) -> bool {
        self.flags & FLAG_SYN != 0
    }

    pub fn is_normal(&self) -> bool {
        self.flags & FLAG_NORMAL != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & FLAG_ACK != 0
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.destination.octets());
        buf.put_slice(&self.source.octets());
        buf.put_u32(self.seqno);
        buf.put_u32(self.ackno);
        buf.put_u8(self.flags);
        buf.put_u32(self.total_size);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATA_HEADER_LEN + self.payload.len());
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn try_deser(raw: &[u8]) -> Result<DataFrame, ProtocolError> {
        if raw.len() < DATA_HEADER_LEN {
            return Err(ProtocolError::MalformedFrame("shorter than data header"));
        }

        let mut buf = raw;
        let destination = Ipv4Addr::from(buf.get_u32());
        let source = Ipv4Addr::from(buf.get_u32());
        let seqno = buf.get_u32();
        let ackno = buf.get_u32();
        let flags = buf.get_u8();
        let total_size = buf.get_u32();
        let payload = Bytes::copy_from_slice(buf);

        Ok(DataFrame {
            destination,
            source,
            seqno,
            ackno,
            flags,
            total_size,
            payload,
        })
    }
}
