//! The outbound side shared by both channels: a packet is assembled byte by byte in a
//!  fixed-capacity buffer and then flushed to the hardware as a single datagram.
//!
//! There is at most one packet in flight: a destination can only be set while the buffer is
//!  empty, and only a flush empties it again.

use crate::config::OverflowPolicy;
use crate::error::ChannelError;
use crate::hardware::{HardwareSocket, SocketId};
use std::fmt::{Debug, Formatter};
use std::net::SocketAddrV4;
use tracing::{error, trace};

pub struct AssemblyBuffer {
    buf: Vec<u8>,
    len: usize,
    destination: Option<SocketAddrV4>,
    overflow_policy: OverflowPolicy,
}

impl AssemblyBuffer {
    pub fn new(capacity: usize, overflow_policy: OverflowPolicy) -> AssemblyBuffer {
        AssemblyBuffer {
            buf: vec![0; capacity],
            len: 0,
            destination: None,
            overflow_policy,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The destination of the packet being assembled. It stays in place after a flush, so
    ///  subsequent packets go to the same peer unless `begin` is called again.
    pub fn destination(&self) -> Option<SocketAddrV4> {
        self.destination
    }

    pub fn begin(&mut self, destination: SocketAddrV4) -> Result<(), ChannelError> {
        if self.len != 0 {
            return Err(ChannelError::AlreadyInFlight);
        }
        self.destination = Some(destination);
        Ok(())
    }

    pub fn push(&mut self, b: u8) -> Result<(), ChannelError> {
        if self.len >= self.capacity() {
            return match self.overflow_policy {
                OverflowPolicy::Drop => {
                    trace!("assembly buffer is full - dropping byte");
                    Ok(())
                }
                OverflowPolicy::Reject => Err(ChannelError::BufferFull),
            };
        }
        self.buf[self.len] = b;
        self.len += 1;
        Ok(())
    }

    /// Appends `data`, returning the number of bytes that were appended. With
    ///  `OverflowPolicy::Drop`, as much as fits is appended and the rest is dropped. With
    ///  `OverflowPolicy::Reject`, data that does not fit completely is refused as a whole with
    ///  `BufferFull`, leaving the buffer unchanged.
    pub fn push_slice(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        let free = self.capacity() - self.len;
        if data.len() > free && self.overflow_policy == OverflowPolicy::Reject {
            return Err(ChannelError::BufferFull);
        }

        let n = data.len().min(free);
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;

        if n < data.len() {
            trace!("assembly buffer is full - dropping {} bytes", data.len() - n);
        }
        Ok(n)
    }

    /// Sends the assembled packet and empties the buffer, regardless of the outcome
    pub fn flush(&mut self, hardware: &dyn HardwareSocket, socket: SocketId) -> Result<usize, ChannelError> {
        let len = self.len;
        self.len = 0;

        if len == 0 {
            return Ok(0);
        }
        let Some(to) = self.destination else {
            return Err(ChannelError::NoDestination);
        };

        trace!("socket {}: flushing {} bytes to {:?}", socket, len, to);
        let result = hardware.send_to(socket, &self.buf[..len], to);
        if result < 0 {
            error!("socket {}: error sending UDP packet to {:?}: code {}", socket, to, result);
            return Err(ChannelError::Transfer { code: result });
        }
        Ok(result as usize)
    }

    /// discards the packet under assembly (but keeps the destination)
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl AsRef<[u8]> for AssemblyBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Debug for AssemblyBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AssemblyBuffer{{to:{:?}, {:?}}}", self.destination, self.as_ref())
    }
}
