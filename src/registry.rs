use crate::error::ChannelError;
use crate::hardware::{HardwareSocket, SocketFlags, SocketId, SocketMode};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// The socket chip has a small, fixed number of hardware sockets. The registry hands them out
///  to channels so that no two channels ever drive the same hardware socket.
///
/// Slots are handed out as `SocketLease`s which return their slot when they are dropped.
pub struct SocketRegistry {
    in_use: Mutex<Vec<bool>>,
}

impl SocketRegistry {
    pub fn new(num_sockets: u8) -> Arc<SocketRegistry> {
        Arc::new(SocketRegistry {
            in_use: Mutex::new(vec![false; num_sockets as usize]),
        })
    }

    /// allocates the lowest free socket index
    pub fn allocate(self: &Arc<Self>) -> Result<SocketLease, ChannelError> {
        let mut in_use = self.in_use.lock().unwrap();
        match in_use.iter().position(|&b| !b) {
            Some(idx) => {
                in_use[idx] = true;
                let socket = SocketId(idx as u8);
                trace!("allocated hardware socket {}", socket);
                Ok(SocketLease {
                    registry: self.clone(),
                    socket,
                })
            }
            None => {
                warn!("all {} hardware sockets are in use", in_use.len());
                Err(ChannelError::NoFreeSocket)
            }
        }
    }

    pub fn num_free(&self) -> usize {
        self.in_use.lock().unwrap()
            .iter()
            .filter(|&&b| !b)
            .count()
    }

    fn release(&self, socket: SocketId) {
        trace!("released hardware socket {}", socket);
        self.in_use.lock().unwrap()[socket.0 as usize] = false;
    }
}

/// Exclusive use of one hardware socket, valid until the lease is dropped
pub struct SocketLease {
    registry: Arc<SocketRegistry>,
    socket: SocketId,
}

impl SocketLease {
    pub fn socket(&self) -> SocketId {
        self.socket
    }
}

impl Debug for SocketLease {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SocketLease({:?})", self.socket)
    }
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        self.registry.release(self.socket);
    }
}

/// A channel's hold on a hardware socket: the socket slot plus the local port it is bound to
#[derive(Debug)]
pub struct ChannelBinding {
    lease: SocketLease,
    port: u16,
}

impl ChannelBinding {
    /// Opens a hardware socket in UDP mode at `port`. A channel that is already bound keeps its
    ///  socket slot and just reopens it, otherwise a slot is allocated from the registry.
    pub fn bind(
        current: Option<ChannelBinding>,
        registry: &Arc<SocketRegistry>,
        hardware: &dyn HardwareSocket,
        port: u16,
        flags: SocketFlags,
    ) -> Result<ChannelBinding, ChannelError> {
        let lease = match current {
            Some(binding) => {
                debug!("socket {}: rebinding from port {} to port {}", binding.socket(), binding.port, port);
                binding.lease
            }
            None => registry.allocate()?,
        };

        hardware.open(lease.socket(), SocketMode::Udp, port, flags);
        debug!("socket {}: opened in UDP mode at port {}", lease.socket(), port);
        Ok(ChannelBinding { lease, port })
    }

    /// closes the hardware socket and returns its slot to the registry
    pub fn release(self, hardware: &dyn HardwareSocket) {
        hardware.close(self.socket());
        debug!("socket {}: closed (port {})", self.socket(), self.port);
    }

    pub fn socket(&self) -> SocketId {
        self.lease.socket()
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
