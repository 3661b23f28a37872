pub mod receiver;
pub mod sender;

/// Unicast port data-bearing frames are exchanged on.
pub const DATA_PORT: u16 = 6161;
/// Unicast port a sender receives acknowledgements on. Relays deliver an ACK
///  here only on its final hop; before that it travels on the data port.
pub const ACK_PORT: u16 = 5454;

/// Receive buffer for data-plane datagrams; comfortably above header plus the
///  maximum payload chunk.
pub(crate) const DATA_RECV_BUF: usize = 6000;
