use crate::hardware::{HardwareSocket, SocketFlags, SocketId, SocketMode};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct LoopbackSocket {
    port: u16,
    receive_queue: VecDeque<(SocketAddrV4, Vec<u8>)>,
    sent: Vec<(SocketAddrV4, Vec<u8>)>,
}

/// An in-memory stand-in for the socket chip that echoes every datagram sent on a socket into
///  that same socket's receive queue, as if the destination had sent it straight back. The echo's
///  sender address is the original destination.
///
/// Datagrams from other peers can be added with `inject`. The queue depth is reported the way the
///  chip does it, i.e. each pending datagram counts with its payload plus `header_overhead`.
pub struct LoopbackHardware {
    header_overhead: usize,
    sockets: Mutex<FxHashMap<SocketId, LoopbackSocket>>,
    num_receive_calls: AtomicUsize,
}

impl LoopbackHardware {
    pub fn new(header_overhead: usize) -> LoopbackHardware {
        LoopbackHardware {
            header_overhead,
            sockets: Default::default(),
            num_receive_calls: AtomicUsize::new(0),
        }
    }

    /// queues a datagram for receipt on `socket`, which must be open
    pub fn inject(&self, socket: SocketId, from: SocketAddrV4, payload: &[u8]) {
        self.sockets.lock().unwrap()
            .get_mut(&socket)
            .expect("injecting into a socket that is not open")
            .receive_queue
            .push_back((from, payload.to_vec()));
    }

    /// the number of times the receive primitive was called, on any socket
    pub fn num_receive_calls(&self) -> usize {
        self.num_receive_calls.load(Ordering::Acquire)
    }

    pub fn num_pending(&self, socket: SocketId) -> usize {
        self.sockets.lock().unwrap()
            .get(&socket)
            .map(|s| s.receive_queue.len())
            .unwrap_or(0)
    }

    pub fn local_port(&self, socket: SocketId) -> Option<u16> {
        self.sockets.lock().unwrap()
            .get(&socket)
            .map(|s| s.port)
    }

    /// asserts that the oldest datagram sent on `socket` and not yet checked went to `to`
    ///  with `payload`, and removes it from the record
    pub fn assert_sent(&self, socket: SocketId, to: SocketAddrV4, payload: &[u8]) {
        let mut sockets = self.sockets.lock().unwrap();
        let sent = &mut sockets.get_mut(&socket)
            .expect("socket was never opened")
            .sent;
        if sent.is_empty() {
            panic!("no datagram was sent");
        }

        let (actual_to, actual_payload) = sent.remove(0);
        assert_eq!(actual_to, to);
        assert_eq!(actual_payload.as_slice(), payload);
    }

    pub fn assert_no_remaining_sends(&self, socket: SocketId) {
        assert!(
            self.sockets.lock().unwrap()
                .get(&socket)
                .map(|s| s.sent.is_empty())
                .unwrap_or(true)
        );
    }
}

impl HardwareSocket for LoopbackHardware {
    fn open(&self, socket: SocketId, mode: SocketMode, port: u16, _flags: SocketFlags) {
        assert_eq!(mode, SocketMode::Udp, "loopback hardware supports only UDP");
        self.sockets.lock().unwrap()
            .insert(socket, LoopbackSocket { port, ..Default::default() });
    }

    fn close(&self, socket: SocketId) {
        self.sockets.lock().unwrap()
            .remove(&socket);
    }

    fn send_to(&self, socket: SocketId, payload: &[u8], to: SocketAddrV4) -> i32 {
        let mut sockets = self.sockets.lock().unwrap();
        let Some(s) = sockets.get_mut(&socket) else {
            return -1;
        };

        s.sent.push((to, payload.to_vec()));
        s.receive_queue.push_back((to, payload.to_vec()));
        payload.len() as i32
    }

    fn receive_from(&self, socket: SocketId, buf: &mut [u8]) -> (i32, SocketAddrV4) {
        self.num_receive_calls.fetch_add(1, Ordering::AcqRel);
        let unspecified = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

        let mut sockets = self.sockets.lock().unwrap();
        let Some(s) = sockets.get_mut(&socket) else {
            return (-1, unspecified);
        };

        match s.receive_queue.pop_front() {
            Some((from, payload)) => {
                let n = payload.len().min(buf.len());
                buf[..n].copy_from_slice(&payload[..n]);
                (n as i32, from)
            }
            None => (0, unspecified),
        }
    }

    fn queue_depth(&self, socket: SocketId) -> usize {
        self.sockets.lock().unwrap()
            .get(&socket)
            .map(|s| s.receive_queue.iter()
                .map(|(_, payload)| payload.len() + self.header_overhead)
                .sum())
            .unwrap_or(0)
    }

    fn next_datagram_len(&self, socket: SocketId) -> Option<usize> {
        self.sockets.lock().unwrap()
            .get(&socket)
            .and_then(|s| s.receive_queue.front())
            .map(|(_, payload)| payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 9)
    }

    #[test]
    fn test_echo() {
        let hw = LoopbackHardware::new(8);
        hw.open(SocketId(1), SocketMode::Udp, 8888, SocketFlags::empty());
        assert_eq!(hw.local_port(SocketId(1)), Some(8888));

        assert_eq!(hw.send_to(SocketId(1), b"abc", peer()), 3);
        assert_eq!(hw.send_to(SocketId(1), b"", peer()), 0);
        assert_eq!(hw.queue_depth(SocketId(1)), 3 + 8 + 8);
        assert_eq!(hw.num_pending(SocketId(1)), 2);
        assert_eq!(hw.next_datagram_len(SocketId(1)), Some(3));
        hw.assert_sent(SocketId(1), peer(), b"abc");
        hw.assert_sent(SocketId(1), peer(), b"");
        hw.assert_no_remaining_sends(SocketId(1));

        let mut buf = [0u8; 2];
        assert_eq!(hw.receive_from(SocketId(1), &mut buf), (2, peer()));
        assert_eq!(&buf, b"ab");
        assert_eq!(hw.queue_depth(SocketId(1)), 8);
        assert_eq!(hw.next_datagram_len(SocketId(1)), Some(0));
        assert_eq!(hw.num_receive_calls(), 1);

        hw.receive_from(SocketId(1), &mut buf);
        assert_eq!(hw.next_datagram_len(SocketId(1)), None);
    }

    #[test]
    fn test_closed_socket() {
        let hw = LoopbackHardware::new(8);
        assert_eq!(hw.send_to(SocketId(0), b"abc", peer()), -1);
        assert_eq!(hw.receive_from(SocketId(0), &mut [0u8; 4]).0, -1);
        assert_eq!(hw.queue_depth(SocketId(0)), 0);
        assert_eq!(hw.next_datagram_len(SocketId(0)), None);

        hw.open(SocketId(0), SocketMode::Udp, 1, SocketFlags::empty());
        hw.inject(SocketId(0), peer(), b"x");
        hw.close(SocketId(0));
        assert_eq!(hw.num_pending(SocketId(0)), 0);
    }
}
