use crate::config::HARDWARE_SOCKET_BUFFER_SIZE;
use crate::hardware::{HardwareSocket, SocketFlags, SocketId, SocketMode};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Mutex;
use tracing::{debug, error, trace, warn};

/// Emulates the socket chip on top of the host operating system's UDP sockets, so the channels
///  can run on a regular machine. Only UDP mode is supported.
///
/// Each socket has an emulated receive buffer of `HARDWARE_SOCKET_BUFFER_SIZE` bytes. Datagrams
///  are moved into it from the OS socket while they fit, each one taking its payload length plus
///  the configured header overhead. The queue depth is the sum over the buffer, as on the chip.
///  Datagrams that do not fit stay in the OS socket until there is room.
pub struct HostSockets {
    header_overhead: usize,
    sockets: Mutex<FxHashMap<SocketId, HostSocket>>,
}

struct HostSocket {
    udp: UdpSocket,
    rx_queue: VecDeque<(SocketAddrV4, Vec<u8>)>,
    rx_bytes: usize,
}

impl HostSocket {
    fn new(udp: UdpSocket) -> HostSocket {
        HostSocket {
            udp,
            rx_queue: Default::default(),
            rx_bytes: 0,
        }
    }

    fn fill(&mut self, socket: SocketId, header_overhead: usize) {
        let mut scratch = [0u8; HARDWARE_SOCKET_BUFFER_SIZE];
        loop {
            let len = match self.udp.peek_from(&mut scratch) {
                Ok((n, _)) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!("socket {}: error polling receive queue: {}", socket, e);
                    return;
                }
            };
            // a datagram bigger than the whole buffer is still taken in when the buffer is empty
            if !self.rx_queue.is_empty() && self.rx_bytes + len + header_overhead > HARDWARE_SOCKET_BUFFER_SIZE {
                trace!("socket {}: receive buffer is full - leaving datagram of {} bytes in the OS queue", socket, len);
                return;
            }

            match self.udp.recv_from(&mut scratch) {
                Ok((n, SocketAddr::V4(from))) => {
                    trace!("socket {}: buffered {} bytes from {:?}", socket, n, from);
                    self.rx_bytes += n + header_overhead;
                    self.rx_queue.push_back((from, scratch[..n].to_vec()));
                }
                Ok((_, from)) => {
                    warn!("socket {}: dropping datagram from IPV6 address {:?}", socket, from);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!("socket {}: error receiving UDP packet: {}", socket, e);
                    return;
                }
            }
        }
    }
}

impl HostSockets {
    pub fn new(header_overhead: usize) -> HostSockets {
        HostSockets {
            header_overhead,
            sockets: Default::default(),
        }
    }

    /// the host socket's actual local address, mostly useful when binding to port 0
    pub fn local_addr(&self, socket: SocketId) -> Option<SocketAddr> {
        self.sockets.lock().unwrap()
            .get(&socket)
            .and_then(|s| s.udp.local_addr().ok())
    }

    fn bind(port: u16, flags: SocketFlags) -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(!flags.contains(SocketFlags::BROADCAST_BLOCK))?;
        if flags.contains(SocketFlags::MULTICAST) {
            warn!("multicast flag is not supported by the host emulation - ignoring");
        }
        Ok(socket)
    }
}

impl HardwareSocket for HostSockets {
    fn open(&self, socket: SocketId, mode: SocketMode, port: u16, flags: SocketFlags) {
        let mut sockets = self.sockets.lock().unwrap();
        // the chip closes a socket implicitly when it is reopened
        sockets.remove(&socket);

        if mode != SocketMode::Udp {
            error!("socket {}: mode {:?} is not supported by the host emulation", socket, mode);
            return;
        }

        match Self::bind(port, flags) {
            Ok(s) => {
                debug!("socket {}: bound to {:?}", socket, s.local_addr());
                sockets.insert(socket, HostSocket::new(s));
            }
            Err(e) => error!("socket {}: error binding to port {}: {}", socket, port, e),
        }
    }

    fn close(&self, socket: SocketId) {
        if self.sockets.lock().unwrap().remove(&socket).is_some() {
            debug!("socket {}: closed", socket);
        }
    }

    fn send_to(&self, socket: SocketId, payload: &[u8], to: SocketAddrV4) -> i32 {
        let sockets = self.sockets.lock().unwrap();
        let Some(s) = sockets.get(&socket) else {
            error!("socket {}: send on a socket that is not open", socket);
            return -1;
        };

        trace!("socket {}: sending {} bytes to {:?}", socket, payload.len(), to);
        match s.udp.send_to(payload, to) {
            Ok(n) => n as i32,
            Err(e) => {
                error!("socket {}: error sending UDP packet to {:?}: {}", socket, to, e);
                -1
            }
        }
    }

    fn receive_from(&self, socket: SocketId, buf: &mut [u8]) -> (i32, SocketAddrV4) {
        let unspecified = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

        let mut sockets = self.sockets.lock().unwrap();
        let Some(s) = sockets.get_mut(&socket) else {
            error!("socket {}: receive on a socket that is not open", socket);
            return (-1, unspecified);
        };

        s.fill(socket, self.header_overhead);
        match s.rx_queue.pop_front() {
            Some((from, payload)) => {
                s.rx_bytes -= payload.len() + self.header_overhead;
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                (n as i32, from)
            }
            None => (0, unspecified),
        }
    }

    fn queue_depth(&self, socket: SocketId) -> usize {
        let mut sockets = self.sockets.lock().unwrap();
        let Some(s) = sockets.get_mut(&socket) else {
            return 0;
        };

        s.fill(socket, self.header_overhead);
        s.rx_bytes
    }

    fn next_datagram_len(&self, socket: SocketId) -> Option<usize> {
        let mut sockets = self.sockets.lock().unwrap();
        let s = sockets.get_mut(&socket)?;

        s.fill(socket, self.header_overhead);
        s.rx_queue.front()
            .map(|(_, payload)| payload.len())
    }
}
