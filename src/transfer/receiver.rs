use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::routing::route_table::RouteTable;
use crate::transfer::{ACK_PORT, DATA_PORT, DATA_RECV_BUF};
use crate::wire::data_frame::DataFrame;

/// The received file is written here, in the working directory, truncating any
///  previous run's output.
pub const OUTPUT_FILENAME: &str = "OUTPUT_FILE";

/// What to do with a frame addressed to this rover.
#[derive(Debug, Eq, PartialEq)]
enum FrameDisposition {
    /// In-sequence chunk: write the payload, acknowledge with `ackno`, and
    ///  finish the transfer if `complete`.
    Deliver { ackno: u32, complete: bool },
    /// Duplicate of the previous chunk, its ACK probably got lost: acknowledge
    ///  again but do not write.
    ReAck { ackno: u32 },
    Ignore,
}

/// Receiver side of the stop-and-wait transfer. Starts idle (expecting a SYN),
///  accepts exactly one in-sequence chunk at a time, and is done when the
///  byte count announced by the SYN has been consumed.
struct ReceiveState {
    expected_seqno: u32,
    remaining: u64,
}

impl ReceiveState {
    fn new() -> ReceiveState {
        ReceiveState {
            expected_seqno: 0,
            remaining: 0,
        }
    }

    fn on_frame(&mut self, frame: &DataFrame) -> FrameDisposition {
        if frame.is_syn() {
            if self.expected_seqno != 0 {
                // a transfer is already running; re-ack iff this is the opening
                // chunk coming around again
                return if self.expected_seqno == 1 {
                    FrameDisposition::ReAck { ackno: 1 }
                } else {
                    FrameDisposition::Ignore
                };
            }
            self.remaining = (frame.total_size as u64).saturating_sub(frame.payload.len() as u64);
            self.expected_seqno = 1;
            FrameDisposition::Deliver {
                ackno: 1,
                complete: self.remaining == 0,
            }
        } else if frame.is_normal() {
            if frame.seqno != self.expected_seqno {
                return if frame.seqno.wrapping_add(1) == self.expected_seqno {
                    FrameDisposition::ReAck {
                        ackno: self.expected_seqno,
                    }
                } else {
                    FrameDisposition::Ignore
                };
            }
            self.remaining = self.remaining.saturating_sub(frame.payload.len() as u64);
            self.expected_seqno += 1;
            FrameDisposition::Deliver {
                ackno: frame.seqno + 1,
                complete: self.remaining == 0,
            }
        } else {
            // ACKs travel to the sender's ACK port; one arriving here has
            // nothing to acknowledge
            FrameDisposition::Ignore
        }
    }
}

/// The shared loop on the data port: relays frames addressed to other rovers
///  along the routing table, runs the receive state machine for frames
///  addressed to us, and returns once a transfer has completed (which ends
///  the process).
pub async fn run_data_plane(
    socket: Arc<UdpSocket>,
    table: Arc<RouteTable>,
    my_private: Ipv4Addr,
) -> anyhow::Result<()> {
    let mut sink = File::create(OUTPUT_FILENAME).await?;
    let mut state = ReceiveState::new();
    let mut buf = vec![0u8; DATA_RECV_BUF];

    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        let raw = &buf[..len];
        let frame = match DataFrame::try_deser(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("discarding malformed data frame from {}: {}", from, e);
                continue;
            }
        };

        if frame.destination != my_private {
            relay(&socket, &table, raw, &frame).await?;
            continue;
        }

        match state.on_frame(&frame) {
            FrameDisposition::Deliver { ackno, complete } => {
                sink.write_all(&frame.payload).await?;
                debug!(
                    "accepted chunk seq {} ({} bytes), {} bytes remaining",
                    frame.seqno,
                    frame.payload.len(),
                    state.remaining
                );
                send_ack(&socket, &table, my_private, &frame, ackno).await?;
                if complete {
                    sink.flush().await?;
                    info!("file fully received, saved as {}", OUTPUT_FILENAME);
                    return Ok(());
                }
            }
            FrameDisposition::ReAck { ackno } => {
                debug!("re-acknowledging duplicate seq {}", frame.seqno);
                send_ack(&socket, &table, my_private, &frame, ackno).await?;
            }
            FrameDisposition::Ignore => {
                debug!("dropping out-of-sequence frame seq {} from {}", frame.seqno, frame.source);
            }
        }
    }
}

/// Store-and-forward relaying: pass the exact bytes on toward the
///  destination's next hop. An ACK on its final hop (the destination is our
///  direct neighbor) goes to the ACK port, everything else to the data port.
async fn relay(
    socket: &UdpSocket,
    table: &RouteTable,
    raw: &[u8],
    frame: &DataFrame,
) -> anyhow::Result<()> {
    match table.get(frame.destination).await {
        Some(route) => {
            let port = if frame.is_ack() && route.metric == 1 {
                ACK_PORT
            } else {
                DATA_PORT
            };
            socket.send_to(raw, (route.next_hop, port)).await?;
            debug!("relayed frame for {} to {}:{}", frame.destination, route.next_hop, port);
        }
        None => debug!("no route to {}, dropping frame", frame.destination),
    }
    Ok(())
}

async fn send_ack(
    socket: &UdpSocket,
    table: &RouteTable,
    my_private: Ipv4Addr,
    frame: &DataFrame,
    ackno: u32,
) -> anyhow::Result<()> {
    let ack = DataFrame::ack(frame.source, my_private, ackno);
    match table.get(frame.source).await {
        Some(route) => {
            let port = if route.metric == 1 { ACK_PORT } else { DATA_PORT };
            socket.send_to(&ack.to_bytes(), (route.next_hop, port)).await?;
            debug!("acknowledged seq {} with ack {} via {}:{}", frame.seqno, ackno, route.next_hop, port);
        }
        None => warn!("no route back to {}, cannot acknowledge", frame.source),
    }
    Ok(())
}
