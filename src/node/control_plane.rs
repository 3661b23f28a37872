use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::routing::distance_vector::AdvertisementSink;
use crate::routing::RoutingEvent;
use crate::wire::advertisement::Advertisement;

/// Receive window for advertisement datagrams.
const ADVERTISEMENT_RECV_BUF: usize = 1024;

/// Owns the multicast socket of the control plane: advertisements go out
///  through [AdvertisementSink::emit] and come in through [recv_loop](Self::recv_loop).
pub struct ControlPlane {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl ControlPlane {
    /// Binds the configured port and joins the multicast group. Address reuse
    ///  is enabled so several rovers can share a machine.
    pub fn bind(group: Ipv4Addr, port: u16) -> anyhow::Result<ControlPlane> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(not(windows))]
        socket.set_reuse_port(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_nonblocking(true)?;

        Ok(ControlPlane {
            socket: UdpSocket::from_std(socket.into())?,
            group: SocketAddrV4::new(group, port),
        })
    }

    /// Blocks on the multicast socket, handing every decodable advertisement
    ///  to the routing event loop together with its sender's public address.
    ///  Malformed datagrams are logged and discarded; receive errors are fatal.
    pub async fn recv_loop(&self, events: mpsc::Sender<RoutingEvent>) -> anyhow::Result<()> {
        let mut buf = [0u8; ADVERTISEMENT_RECV_BUF];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;

            let source_public = match from {
                SocketAddr::V4(addr) => *addr.ip(),
                SocketAddr::V6(addr) => {
                    warn!("ignoring advertisement from non-IPv4 source {}", addr);
                    continue;
                }
            };

            match Advertisement::try_deser(&buf[..len]) {
                Ok(advertisement) => {
                    trace!(
                        "received advertisement from {} with {} records",
                        source_public,
                        advertisement.records.len()
                    );
                    if events
                        .send(RoutingEvent::Advertisement {
                            source_public,
                            advertisement,
                        })
                        .await
                        .is_err()
                    {
                        // the event loop is gone, we are shutting down
                        return Ok(());
                    }
                }
                Err(e) => warn!("discarding malformed advertisement from {}: {}", from, e),
            }
        }
    }
}

#[async_trait]
impl AdvertisementSink for ControlPlane {
    async fn emit(&self, advertisement: &Advertisement) -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        advertisement.ser(&mut buf);
        self.socket.send_to(&buf, SocketAddr::V4(self.group)).await?;
        trace!("emitted advertisement with {} records", advertisement.records.len());
        Ok(())
    }
}
