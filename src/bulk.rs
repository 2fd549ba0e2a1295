use crate::assembly::AssemblyBuffer;
use crate::config::{ChannelConfig, ReceiveBounds};
use crate::error::ChannelError;
use crate::hardware::{HardwareSocket, SocketId};
use crate::registry::{ChannelBinding, SocketRegistry};
use std::net::SocketAddrV4;
use std::sync::Arc;
use tracing::{debug, error};

/// A UDP channel that moves whole datagrams between caller-supplied buffers and the hardware.
///
/// Apart from whole-buffer send and receive, there is a single-shot assembly path for outbound
///  packets: `begin_packet`, any number of `write` calls, then `end_packet`.
///
/// NB: `available` reports the hardware's queue depth verbatim, i.e. *including* the per-datagram
///  header overhead. This differs from `BytewiseChannel::available`, which reports payload bytes.
pub struct BulkChannel {
    hardware: Arc<dyn HardwareSocket>,
    registry: Arc<SocketRegistry>,
    config: ChannelConfig,
    binding: Option<ChannelBinding>,
    assembly: AssemblyBuffer,
}

impl BulkChannel {
    pub fn new(hardware: Arc<dyn HardwareSocket>, registry: Arc<SocketRegistry>, config: ChannelConfig) -> anyhow::Result<BulkChannel> {
        config.validate()?;

        let assembly = AssemblyBuffer::new(config.tx_packet_capacity, config.overflow_policy);
        Ok(BulkChannel {
            hardware,
            registry,
            config,
            binding: None,
            assembly,
        })
    }

    /// Binds the channel to a hardware socket listening at `port`, discarding any packet under
    ///  assembly. Calling this on a bound channel rebinds it.
    pub fn begin(&mut self, port: u16) -> Result<(), ChannelError> {
        self.assembly.clear();
        let binding = ChannelBinding::bind(self.binding.take(), &self.registry, self.hardware.as_ref(), port, self.config.socket_flags)?;
        self.binding = Some(binding);
        Ok(())
    }

    /// Closes the hardware socket and returns it to the registry. The channel can be bound
    ///  again with `begin`.
    pub fn close(&mut self) {
        self.assembly.clear();
        if let Some(binding) = self.binding.take() {
            binding.release(self.hardware.as_ref());
        }
    }

    pub fn local_port(&self) -> Option<u16> {
        self.binding.as_ref().map(|b| b.port())
    }

    fn socket(&self) -> Result<SocketId, ChannelError> {
        self.binding.as_ref()
            .map(|b| b.socket())
            .ok_or(ChannelError::NotBound)
    }

    /// Sends `payload` as a single datagram. The payload may contain zero bytes, and it is
    ///  passed to the hardware without checking its length.
    pub fn send_datagram(&mut self, payload: &[u8], to: SocketAddrV4) -> Result<usize, ChannelError> {
        let socket = self.socket()?;

        let result = self.hardware.send_to(socket, payload, to);
        if result < 0 {
            error!("socket {}: error sending UDP packet to {:?}: code {}", socket, to, result);
            return Err(ChannelError::Transfer { code: result });
        }
        Ok(result as usize)
    }

    /// Sends a zero-terminated string: the datagram ends before the first zero byte in `text`,
    ///  or at the end of the slice if there is none.
    pub fn send_c_string(&mut self, text: &[u8], to: SocketAddrV4) -> Result<usize, ChannelError> {
        let len = text.iter()
            .position(|&b| b == 0)
            .unwrap_or(text.len());
        self.send_datagram(&text[..len], to)
    }

    /// The hardware's receive queue depth, including the header overhead the chip reports.
    ///  0 means there is nothing to receive.
    pub fn available(&self) -> usize {
        match self.socket() {
            Ok(socket) => self.hardware.queue_depth(socket),
            Err(_) => 0,
        }
    }

    /// Receives the next datagram into `buf`, returning its length and sender. If there is no
    ///  datagram pending, the hardware returns 0.
    ///
    /// With `ReceiveBounds::Passthrough` (the default), `buf` goes to the hardware unchecked and
    ///  any payload beyond `buf.len()` is lost. With `ReceiveBounds::Enforce`, the next
    ///  datagram's length is checked first, and an oversized datagram is refused and stays queued.
    pub fn receive_datagram_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4), ChannelError> {
        let socket = self.socket()?;

        if self.config.receive_bounds == ReceiveBounds::Enforce {
            if let Some(pending) = self.hardware.next_datagram_len(socket) {
                if pending > buf.len() {
                    debug!("socket {}: pending datagram of {} bytes does not fit buffer of {} bytes", socket, pending, buf.len());
                    return Err(ChannelError::ReceiveBufferTooSmall { pending, capacity: buf.len() });
                }
            }
        }

        let (received, from) = self.hardware.receive_from(socket, buf);
        if received < 0 {
            error!("socket {}: error receiving UDP packet: code {}", socket, received);
            return Err(ChannelError::Transfer { code: received });
        }
        Ok((received as usize, from))
    }

    /// same as `receive_datagram_from`, discarding the sender's address
    pub fn receive_datagram(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.receive_datagram_from(buf)
            .map(|(n, _)| n)
    }

    /// Starts assembling a packet for `to`. Fails if bytes were written since the last
    ///  `end_packet`, leaving the previous destination in place.
    pub fn begin_packet(&mut self, to: SocketAddrV4) -> Result<(), ChannelError> {
        self.assembly.begin(to)
    }

    pub fn write(&mut self, b: u8) -> Result<(), ChannelError> {
        self.assembly.push(b)
    }

    pub fn write_slice(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        self.assembly.push_slice(data)
    }

    /// Sends the assembled packet, returning the number of bytes sent (0 if nothing was
    ///  written). The assembly buffer is empty afterwards, whatever the outcome.
    pub fn end_packet(&mut self) -> Result<usize, ChannelError> {
        let socket = match self.socket() {
            Ok(socket) => socket,
            Err(e) => {
                self.assembly.clear();
                return Err(e);
            }
        };
        self.assembly.flush(self.hardware.as_ref(), socket)
    }
}
