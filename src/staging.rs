//! Local copy of a single received datagram, for serving it to the application in small pieces
//!  without going back to the hardware for every byte.
//!
//! ```ascii
//!            available() with data in hardware queue
//!   EMPTY  -------------------------------------------->  STAGED (cursor=0, size=N)
//!     ^                                                     |   ^
//!     |        read() with cursor == size                   |   | read(): cursor += 1
//!     +-----------------------------------------------------+---+
//! ```
//!
//! The sender address is captured together with the payload and is replaced only when the
//!  next datagram is pulled. It therefore remains readable (if stale) after the datagram is
//!  drained.

use crate::error::ChannelError;
use crate::hardware::{HardwareSocket, SocketId};
use bytes::Buf;
use std::fmt::{Debug, Formatter};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, error, trace};

pub struct StagingBuffer {
    buf: Vec<u8>,
    cursor: usize,
    size: usize,
    sender: SocketAddrV4,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> StagingBuffer {
        StagingBuffer {
            buf: vec![0; capacity],
            cursor: 0,
            size: 0,
            sender: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// number of payload bytes of the staged datagram, read or not
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_drained(&self) -> bool {
        self.cursor == self.size
    }

    pub fn sender(&self) -> SocketAddrV4 {
        self.sender
    }

    /// Back to `EMPTY`. The sender address is left in place.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.size = 0;
    }

    /// Replaces the staged datagram with the next one from the hardware queue, if there is one.
    ///  `queue_depth` is the depth reported by the hardware, including `header_overhead`. It
    ///  covers every pending datagram, so it only bounds the receive size. The hardware
    ///  reports the actual length of the datagram it hands out.
    ///
    /// Returns the staged datagram's size, which is 0 for an empty queue. A failing receive
    ///  leaves the buffer `EMPTY`.
    pub fn pull(&mut self, hardware: &dyn HardwareSocket, socket: SocketId, queue_depth: usize, header_overhead: usize) -> Result<usize, ChannelError> {
        if queue_depth == 0 {
            return Ok(0);
        }

        self.reset();
        let pending_len = queue_depth.saturating_sub(header_overhead);
        let max_len = pending_len.min(self.capacity());
        trace!("socket {}: {} payload bytes pending, receive size bounded to {}", socket, pending_len, max_len);

        let (received, sender) = hardware.receive_from(socket, &mut self.buf[..max_len]);
        if received < 0 {
            error!("socket {}: error receiving UDP packet: code {}", socket, received);
            return Err(ChannelError::Transfer { code: received });
        }

        self.size = (received as usize).min(max_len);
        self.sender = sender;
        debug!("socket {}: staged {} bytes from {:?}", socket, self.size, sender);
        Ok(self.size)
    }

    /// Next byte of the staged datagram. When the datagram is exhausted, this returns `None`
    ///  and resets the buffer to `EMPTY`.
    pub fn next_byte(&mut self) -> Option<u8> {
        if self.cursor != self.size {
            Some(self.get_u8())
        }
        else {
            self.reset();
            None
        }
    }

    pub fn peek(&self) -> Option<u8> {
        self.chunk().first().copied()
    }

    /// copies as many of the remaining bytes as fit into `dst`
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.remaining());
        self.copy_to_slice(&mut dst[..n]);
        n
    }
}

impl Buf for StagingBuffer {
    fn remaining(&self) -> usize {
        self.size - self.cursor
    }

    fn chunk(&self) -> &[u8] {
        &self.buf[self.cursor..self.size]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.remaining(), "advancing {} bytes past the end of the staged datagram", cnt);
        self.cursor += cnt;
    }
}

impl Debug for StagingBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "StagingBuffer{{from:{:?}, {}/{}}}", self.sender, self.cursor, self.size)
    }
}
