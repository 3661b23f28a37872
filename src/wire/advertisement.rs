use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};

use crate::wire::ProtocolError;

/// The only supported version of the advertisement protocol.
pub const PROTOCOL_VERSION: u8 = 2;
/// Address family identifier for IP, carried in header byte 5.
const ADDRESS_FAMILY_IP: u8 = 2;

pub const HEADER_LEN: usize = 8;
pub const RECORD_LEN: usize = 16;

/// Hop-count value meaning "unreachable".
pub const INFINITY_METRIC: u8 = 16;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum RipCommand {
    Request = 1,
    Update = 2,
}

impl TryFrom<u8> for RipCommand {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, ProtocolError> {
        match v {
            1 => Ok(RipCommand::Request),
            2 => Ok(RipCommand::Update),
            _ => Err(ProtocolError::MalformedFrame("unknown command byte")),
        }
    }
}

/// One route as carried on the wire and as stored in the routing table: the
///  destination's private address, the prefix length of its subnet, the public
///  address of the next hop toward it, and the hop count.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RouteRecord {
    pub destination: Ipv4Addr,
    pub subnet_mask: u8,
    pub next_hop: Ipv4Addr,
    pub metric: u8,
}

impl RouteRecord {
    /// The mask and metric occupy only the low byte of their four-byte wire
    ///  fields; the metric is clamped to [INFINITY_METRIC] on encode.
    fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.destination.octets());
        buf.put_u32(self.subnet_mask as u32);
        buf.put_slice(&self.next_hop.octets());
        buf.put_u32(self.metric.min(INFINITY_METRIC) as u32);
    }

    /// Reads the low byte of the mask and metric fields; range enforcement is
    ///  left to the routing layer.
    fn deser(buf: &mut impl Buf) -> RouteRecord {
        let destination = Ipv4Addr::from(buf.get_u32());
        let subnet_mask = buf.get_u32() as u8;
        let next_hop = Ipv4Addr::from(buf.get_u32());
        let metric = buf.get_u32() as u8;
        RouteRecord {
            destination,
            subnet_mask,
            next_hop,
            metric,
        }
    }
}

/// A routing advertisement: an 8-byte header followed by any number of 16-byte
///  route records. The sender's rover id rides in header byte 2 and is the
///  receiver's source identity for the distance-vector update.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Advertisement {
    pub command: RipCommand,
    pub rover_id: u8,
    pub records: Vec<RouteRecord>,
}

impl Advertisement {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.command as u8);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.rover_id);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u8(ADDRESS_FAMILY_IP);
        buf.put_u16(0);
        for record in &self.records {
            record.ser(buf);
        }
    }

    pub fn try_deser(raw: &[u8]) -> Result<Advertisement, ProtocolError> {
        if raw.len() < HEADER_LEN {
            return Err(ProtocolError::MalformedFrame("shorter than header"));
        }
        if (raw.len() - HEADER_LEN) % RECORD_LEN != 0 {
            return Err(ProtocolError::MalformedFrame("truncated route record"));
        }

        let mut buf = raw;
        let command = RipCommand::try_from(buf.get_u8())?;
        let _version = buf.get_u8();
        let rover_id = buf.get_u8();
        buf.advance(5);

        let mut records = Vec::with_capacity((raw.len() - HEADER_LEN) / RECORD_LEN);
        while buf.has_remaining() {
            records.push(RouteRecord::deser(&mut buf));
        }

        Ok(Advertisement {
            command,
            rover_id,
            records,
        })
    }
}
