use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::node::rover_config::RoverConfig;
use crate::routing::route_table::RouteTable;
use crate::transfer::{DATA_PORT, DATA_RECV_BUF};
use crate::wire::data_frame::{DataFrame, MAX_PAYLOAD_LEN};

/// Sends the configured file to the destination rover, one stop-and-wait chunk
///  at a time. Waits out a startup delay for routes to converge, then polls
///  the routing table until the destination appears. Returns once the whole
///  file has been acknowledged, which ends the process.
pub async fn send_file(
    data_socket: Arc<UdpSocket>,
    ack_socket: Arc<UdpSocket>,
    table: Arc<RouteTable>,
    my_private: Ipv4Addr,
    destination: Ipv4Addr,
    path: &Path,
    config: Arc<RoverConfig>,
) -> anyhow::Result<()> {
    sleep(config.transfer_startup_delay).await;

    while !table.has(destination).await {
        info!(
            "no route to {} yet, checking again in {:?}",
            destination, config.route_poll_interval
        );
        sleep(config.route_poll_interval).await;
    }

    let file = File::open(path).await?;
    let total_size: u32 = file
        .metadata()
        .await?
        .len()
        .try_into()
        .map_err(|_| anyhow!("{} is too large for a single transfer", path.display()))?;
    let mut reader = BufReader::new(file);

    info!("sending {} ({} bytes) to {}", path.display(), total_size, destination);

    let mut buf = vec![0u8; MAX_PAYLOAD_LEN];
    let mut seqno = 0u32;
    let mut first = true;

    loop {
        let n = read_chunk(&mut reader, &mut buf).await?;
        if n == 0 && !first {
            break;
        }

        let payload = Bytes::copy_from_slice(&buf[..n]);
        let frame = if first {
            DataFrame::syn(destination, my_private, payload, total_size)
        } else {
            DataFrame::normal(destination, my_private, seqno, payload)
        };
        transmit_until_acked(&data_socket, &ack_socket, &table, &frame, &config).await?;

        first = false;
        seqno += 1;
        if n == 0 {
            // empty file: it was delivered as a single empty opening chunk
            break;
        }
    }

    info!("{} fully sent and acknowledged by {}", path.display(), destination);
    Ok(())
}

/// Fills the buffer from the reader, returning short only at end of file, so
///  that every chunk but the last carries the full payload size.
async fn read_chunk(reader: &mut BufReader<File>, buf: &mut [u8]) -> anyhow::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// One stop-and-wait round: transmit the frame to the destination's current
///  next hop and wait for its acknowledgement, retransmitting on every
///  timeout. There is no retry cap; a destination whose route vanished is
///  waited for the same way as before the transfer.
async fn transmit_until_acked(
    data_socket: &UdpSocket,
    ack_socket: &UdpSocket,
    table: &RouteTable,
    frame: &DataFrame,
    config: &RoverConfig,
) -> anyhow::Result<()> {
    let raw = frame.to_bytes();
    let expected_ackno = frame.seqno + 1;
    let mut attempt = 0u32;

    loop {
        let Some(route) = table.get(frame.destination).await else {
            warn!("route to {} disappeared, waiting for it to return", frame.destination);
            sleep(config.route_poll_interval).await;
            continue;
        };

        if attempt > 0 {
            info!("retransmitting seq {} (attempt {})", frame.seqno, attempt + 1);
        }
        data_socket.send_to(&raw, (route.next_hop, DATA_PORT)).await?;
        trace!(
            "sent seq {} ({} bytes) toward {} via {}",
            frame.seqno,
            frame.payload.len(),
            frame.destination,
            route.next_hop
        );

        if await_ack(ack_socket, expected_ackno, config).await? {
            debug!("received ack {}", expected_ackno);
            return Ok(());
        }
        info!("timed out waiting for ack {}", expected_ackno);
        attempt += 1;
    }
}

/// Waits for an acknowledgement carrying the expected ack number. Unrelated
///  frames arriving on the ACK port are discarded without extending the wait
///  window. Returns false on timeout.
async fn await_ack(
    ack_socket: &UdpSocket,
    expected_ackno: u32,
    config: &RoverConfig,
) -> anyhow::Result<bool> {
    let mut buf = vec![0u8; DATA_RECV_BUF];
    let deadline = Instant::now() + config.ack_timeout;

    loop {
        let (len, from) = match timeout_at(deadline, ack_socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_elapsed) => return Ok(false),
        };
        match DataFrame::try_deser(&buf[..len]) {
            Ok(frame) if frame.is_ack() && frame.ackno == expected_ackno => return Ok(true),
            Ok(frame) => trace!(
                "ignoring frame from {} while awaiting ack {} (flags {:#04x}, ack {})",
                from,
                expected_ackno,
                frame.flags,
                frame.ackno
            ),
            Err(e) => warn!("discarding malformed frame on ack port from {}: {}", from, e),
        }
    }
}
