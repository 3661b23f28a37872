use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use anyhow::anyhow;

/// A rover's private address is synthesized from its id: `10.<id>.0.1`. It is
///  the stable routing-domain name of the rover, independent of the interface
///  address packets are actually delivered to.
pub fn private_address_for_id(id: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, id, 0, 1)
}

/// Determine this machine's address on the outbound interface by connecting a
///  throwaway UDP socket to a well-known public endpoint and reading back the
///  OS-chosen local address. No datagram is actually sent.
pub fn discover_public_address() -> anyhow::Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:20800")?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(addr) => Err(anyhow!("outbound interface has no IPv4 address: {}", addr)),
    }
}
