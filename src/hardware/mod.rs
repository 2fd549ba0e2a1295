//! The hardware socket API that the channels are built on. It mirrors the primitives of an
//!  offload chip's firmware (W5100 style): a small, fixed number of sockets addressed by index,
//!  and blocking-free calls that move whole byte ranges to / from the chip's buffers.
//!
//! Link bring-up, IP configuration and chip initialization happen before any of this is used.

pub mod host;

use bitflags::bitflags;
#[cfg(test)] use mockall::automock;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddrV4;

/// Index of one of the chip's hardware sockets
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct SocketId(pub u8);

impl Debug for SocketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.0)
    }
}
impl Display for SocketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol mode of a hardware socket, encoded the way the chip's mode register does
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum SocketMode {
    Closed = 0,
    Tcp = 1,
    Udp = 2,
    IpRaw = 3,
    MacRaw = 4,
    Pppoe = 5,
}

bitflags! {
    /// Option bits passed to the chip when opening a socket. They share the mode register with
    ///  the protocol bits, so their values do not overlap with `SocketMode`.
    #[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
    pub struct SocketFlags: u8 {
        const MULTICAST       = 0b1000_0000;
        const BROADCAST_BLOCK = 0b0100_0000;
        const NO_DELAYED_ACK  = 0b0010_0000;
    }
}

/// This is the consumed interface of the socket hardware, introduced as a trait to allow
///  swapping the chip for a host emulation or test doubles.
///
/// Return values follow the firmware's conventions rather than Rust's: the send primitive
///  returns the number of bytes sent or a negative error code, and the receive primitive
///  returns the number of bytes copied (negative on error) together with the sender's address.
#[cfg_attr(test, automock)]
pub trait HardwareSocket: Send + Sync + 'static {
    /// (Re)open a socket. There is no failure path, the chip does not report one.
    fn open(&self, socket: SocketId, mode: SocketMode, port: u16, flags: SocketFlags);

    fn close(&self, socket: SocketId);

    fn send_to(&self, socket: SocketId, payload: &[u8], to: SocketAddrV4) -> i32;

    /// Copy the next pending datagram into `buf`, consuming it. Payload in excess of
    ///  `buf.len()` is lost.
    fn receive_from(&self, socket: SocketId, buf: &mut [u8]) -> (i32, SocketAddrV4);

    /// The number of bytes waiting in the socket's receive buffer, summed over all pending
    ///  datagrams. For UDP, the chip prepends a header to every datagram, and this header is
    ///  included in the number. With more than one datagram queued, this is not the size of the
    ///  next one.
    fn queue_depth(&self, socket: SocketId) -> usize;

    /// Payload length of the next pending datagram, taken from its header without consuming
    ///  anything. `None` if nothing is pending.
    fn next_datagram_len(&self, socket: SocketId) -> Option<usize>;
}
