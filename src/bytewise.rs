use crate::assembly::AssemblyBuffer;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::hardware::{HardwareSocket, SocketId};
use crate::registry::{ChannelBinding, SocketRegistry};
use crate::staging::StagingBuffer;
use bytes::Buf;
use std::net::SocketAddrV4;
use std::sync::Arc;
use tracing::trace;

/// A UDP channel for applications that produce and consume datagrams one byte at a time.
///
/// Outbound packets are assembled with `begin_packet` / `write` / `end_packet`. Inbound, one
///  datagram at a time is staged locally by `available` and then served by `read`. The hardware
///  is queried again only after the staged datagram was fully consumed, so the sender address
///  stays valid while its datagram is being read, even if more datagrams arrive meanwhile.
pub struct BytewiseChannel {
    hardware: Arc<dyn HardwareSocket>,
    registry: Arc<SocketRegistry>,
    config: ChannelConfig,
    binding: Option<ChannelBinding>,
    assembly: AssemblyBuffer,
    staging: StagingBuffer,
}

impl BytewiseChannel {
    pub fn new(hardware: Arc<dyn HardwareSocket>, registry: Arc<SocketRegistry>, config: ChannelConfig) -> anyhow::Result<BytewiseChannel> {
        config.validate()?;

        let assembly = AssemblyBuffer::new(config.tx_packet_capacity, config.overflow_policy);
        let staging = StagingBuffer::new(config.rx_packet_capacity);
        Ok(BytewiseChannel {
            hardware,
            registry,
            config,
            binding: None,
            assembly,
            staging,
        })
    }

    /// Binds the channel to a hardware socket listening at `port`. Both the packet under assembly
    ///  and the staged datagram are discarded.
    pub fn begin(&mut self, port: u16) -> Result<(), ChannelError> {
        self.assembly.clear();
        self.staging.reset();
        let binding = ChannelBinding::bind(self.binding.take(), &self.registry, self.hardware.as_ref(), port, self.config.socket_flags)?;
        self.binding = Some(binding);
        Ok(())
    }

    pub fn close(&mut self) {
        self.assembly.clear();
        self.staging.reset();
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

    pub fn begin_packet(&mut self, to: SocketAddrV4) -> Result<(), ChannelError> {
        self.assembly.begin(to)
    }

    pub fn write(&mut self, b: u8) -> Result<(), ChannelError> {
        self.assembly.push(b)
    }

    pub fn write_slice(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        self.assembly.push_slice(data)
    }

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

    /// The number of unread payload bytes in the staged datagram.
    ///
    /// If the staged datagram is used up, this pulls the next one from the hardware (if any) and
    ///  returns its size. A partially read datagram is never replaced, and the hardware is not
    ///  touched while one is staged. Fails with `NotBound` if the channel is not bound.
    pub fn available(&mut self) -> Result<usize, ChannelError> {
        if !self.staging.is_drained() {
            return Ok(self.staging.remaining());
        }

        let socket = self.socket()?;

        let depth = self.hardware.queue_depth(socket);
        if depth == 0 {
            return Ok(0);
        }
        self.staging.pull(self.hardware.as_ref(), socket, depth, self.config.header_overhead)
    }

    /// The next byte of the staged datagram, or `None` if it is used up. Returning `None` resets
    ///  the staging buffer so that the next `available` call pulls a fresh datagram.
    ///
    /// NB: This does not pull from the hardware - call `available` first.
    pub fn read(&mut self) -> Option<u8> {
        self.staging.next_byte()
    }

    /// the next byte of the staged datagram without consuming it
    pub fn peek(&self) -> Option<u8> {
        self.staging.peek()
    }

    /// Copies unread bytes of the staged datagram into `buf`, returning the number of bytes
    ///  copied. This never reaches into the next datagram.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        self.staging.read_into(buf)
    }

    /// Skips the rest of the staged datagram.
    pub fn discard_datagram(&mut self) {
        if !self.staging.is_drained() {
            trace!("discarding {} unread bytes of staged datagram", self.staging.remaining());
        }
        self.staging.reset();
    }

    /// The sender of the most recently staged datagram.
    ///
    /// NB: After a datagram is drained, this still returns its sender until the next datagram
    ///  is staged - it is up to the caller to ask while the data is current.
    pub fn sender_address(&self) -> SocketAddrV4 {
        self.staging.sender()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use rstest::rstest;
    use crate::hardware::MockHardwareSocket;
    use crate::test_util::loopback::LoopbackHardware;
    use super::*;

    fn peer(n: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, n), 5000 + n as u16)
    }

    fn loopback_channel() -> (Arc<LoopbackHardware>, BytewiseChannel) {
        let hardware = Arc::new(LoopbackHardware::new(8));
        let mut channel = BytewiseChannel::new(hardware.clone(), SocketRegistry::new(4), ChannelConfig::default_w5100()).unwrap();
        channel.begin(8888).unwrap();
        (hardware, channel)
    }

    fn drain(channel: &mut BytewiseChannel) -> Vec<u8> {
        let mut result = Vec::new();
        while let Some(b) = channel.read() {
            result.push(b);
        }
        result
    }

    #[rstest]
    #[case::single(vec![42])]
    #[case::binary(vec![0, 1, 0, 255])]
    #[case::full(b"0123456789abcdefghijklmn".to_vec())]
    fn test_round_trip(#[case] payload: Vec<u8>) {
        let (hardware, mut channel) = loopback_channel();

        channel.begin_packet(peer(1)).unwrap();
        for &b in &payload {
            channel.write(b).unwrap();
        }
        assert_eq!(channel.end_packet(), Ok(payload.len()));
        hardware.assert_sent(SocketId(0), peer(1), &payload);

        assert_eq!(channel.available(), Ok(payload.len()));
        assert_eq!(channel.sender_address(), peer(1));
        assert_eq!(drain(&mut channel), payload);
        assert_eq!(channel.sender_address(), peer(1));
        assert_eq!(channel.available(), Ok(0));
    }

    #[test]
    fn test_available_counts_down() {
        let (hardware, mut channel) = loopback_channel();
        hardware.inject(SocketId(0), peer(1), b"abc");

        assert_eq!(channel.available(), Ok(3));
        assert_eq!(channel.read(), Some(b'a'));
        assert_eq!(channel.available(), Ok(2));
        assert_eq!(channel.read(), Some(b'b'));
        assert_eq!(channel.read(), Some(b'c'));
        assert_eq!(channel.available(), Ok(0));
    }

    #[test]
    fn test_lazy_pull() {
        let (hardware, mut channel) = loopback_channel();
        hardware.inject(SocketId(0), peer(1), b"ab");
        hardware.inject(SocketId(0), peer(2), b"xyz");

        assert_eq!(channel.available(), Ok(2));
        assert_eq!(hardware.num_receive_calls(), 1);

        // a newer datagram is pending, but the staged one is not used up yet
        assert_eq!(channel.read(), Some(b'a'));
        assert_eq!(channel.available(), Ok(1));
        assert_eq!(channel.sender_address(), peer(1));
        assert_eq!(hardware.num_receive_calls(), 1);

        assert_eq!(channel.read(), Some(b'b'));
        assert_eq!(channel.available(), Ok(3));
        assert_eq!(channel.sender_address(), peer(2));
        assert_eq!(hardware.num_receive_calls(), 2);

        assert_eq!(drain(&mut channel), b"xyz");
        assert_eq!(channel.available(), Ok(0));
        assert_eq!(hardware.num_receive_calls(), 2);
    }

    #[test]
    fn test_lazy_pull_with_mock() {
        let mut seq = Sequence::new();
        let mut hardware = MockHardwareSocket::new();
        hardware.expect_open()
            .return_const(());
        hardware.expect_queue_depth()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(4usize + 8);
        hardware.expect_receive_from()
            .withf(|socket, buf| *socket == SocketId(0) && buf.len() == 4)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, buf| {
                buf.copy_from_slice(b"wxyz");
                (4, peer(3))
            });

        let mut channel = BytewiseChannel::new(Arc::new(hardware), SocketRegistry::new(4), ChannelConfig::default_w5100()).unwrap();
        channel.begin(8888).unwrap();

        for expected in (1..=4).rev() {
            assert_eq!(channel.available(), Ok(expected));
            assert!(channel.read().is_some());
        }
    }

    #[rstest]
    #[case::empty_payload(0)]
    #[case::short(5)]
    #[case::capacity(24)]
    fn test_header_overhead_is_subtracted(#[case] payload_len: usize) {
        let mut hardware = MockHardwareSocket::new();
        hardware.expect_open()
            .return_const(());
        hardware.expect_queue_depth()
            .with(eq(SocketId(0)))
            .times(1)
            .return_const(payload_len + 8);
        hardware.expect_receive_from()
            .withf(move |_, buf| buf.len() == payload_len)
            .times(1)
            .returning(|_, buf| (buf.len() as i32, peer(1)));

        let mut channel = BytewiseChannel::new(Arc::new(hardware), SocketRegistry::new(4), ChannelConfig::default_w5100()).unwrap();
        channel.begin(8888).unwrap();

        assert_eq!(channel.available(), Ok(payload_len));
    }

    #[test]
    fn test_oversized_datagram_is_truncated() {
        let (hardware, mut channel) = loopback_channel();
        hardware.inject(SocketId(0), peer(1), &[9; 30]);

        assert_eq!(channel.available(), Ok(24));
        assert_eq!(drain(&mut channel), vec![9; 24]);
        assert_eq!(hardware.num_pending(SocketId(0)), 0);
    }

    #[test]
    fn test_empty_queue_leaves_staging_alone() {
        let mut hardware = MockHardwareSocket::new();
        hardware.expect_open()
            .return_const(());
        hardware.expect_queue_depth()
            .times(2)
            .return_const(0usize);

        let mut channel = BytewiseChannel::new(Arc::new(hardware), SocketRegistry::new(4), ChannelConfig::default_w5100()).unwrap();
        channel.begin(8888).unwrap();

        assert_eq!(channel.available(), Ok(0));
        assert_eq!(channel.read(), None);
        assert_eq!(channel.available(), Ok(0));
    }

    #[test]
    fn test_read_sentinel_rearms_pull() {
        let (hardware, mut channel) = loopback_channel();
        assert_eq!(channel.read(), None);

        hardware.inject(SocketId(0), peer(1), b"a");
        hardware.inject(SocketId(0), peer(2), b"b");
        assert_eq!(channel.available(), Ok(1));
        assert_eq!(channel.read(), Some(b'a'));
        assert_eq!(channel.read(), None);
        assert_eq!(channel.read(), None);

        assert_eq!(channel.available(), Ok(1));
        assert_eq!(channel.read(), Some(b'b'));
        assert_eq!(channel.sender_address(), peer(2));
    }

    #[test]
    fn test_receive_failure() {
        let mut hardware = MockHardwareSocket::new();
        hardware.expect_open()
            .return_const(());
        hardware.expect_queue_depth()
            .return_const(20usize);
        hardware.expect_receive_from()
            .return_const((-1, peer(1)));

        let mut channel = BytewiseChannel::new(Arc::new(hardware), SocketRegistry::new(4), ChannelConfig::default_w5100()).unwrap();
        channel.begin(8888).unwrap();

        assert_eq!(channel.available(), Err(ChannelError::Transfer { code: -1 }));
        assert_eq!(channel.read(), None);
    }

    #[test]
    fn test_at_most_one_packet_in_flight() {
        let (hardware, mut channel) = loopback_channel();

        channel.begin_packet(peer(1)).unwrap();
        channel.write(7).unwrap();
        assert_eq!(channel.begin_packet(peer(2)), Err(ChannelError::AlreadyInFlight));
        assert_eq!(channel.end_packet(), Ok(1));

        hardware.assert_sent(SocketId(0), peer(1), &[7]);
        hardware.assert_no_remaining_sends(SocketId(0));
        assert_eq!(channel.begin_packet(peer(2)), Ok(()));
    }

    #[test]
    fn test_overflow_drop() {
        let (hardware, mut channel) = loopback_channel();

        channel.begin_packet(peer(1)).unwrap();
        for b in 0..40u8 {
            channel.write(b).unwrap();
        }
        assert_eq!(channel.end_packet(), Ok(24));
        hardware.assert_sent(SocketId(0), peer(1), &(0..24).collect::<Vec<u8>>());
    }

    #[test]
    fn test_end_packet_nothing_written() {
        let (hardware, mut channel) = loopback_channel();
        channel.begin_packet(peer(1)).unwrap();

        assert_eq!(channel.end_packet(), Ok(0));
        hardware.assert_no_remaining_sends(SocketId(0));
    }

    #[test]
    fn test_peek_read_into_and_discard() {
        let (hardware, mut channel) = loopback_channel();
        hardware.inject(SocketId(0), peer(1), b"hello");
        hardware.inject(SocketId(0), peer(2), b"world");

        assert_eq!(channel.available(), Ok(5));
        assert_eq!(channel.peek(), Some(b'h'));

        let mut buf = [0u8; 3];
        assert_eq!(channel.read_into(&mut buf), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(channel.available(), Ok(2));

        channel.discard_datagram();
        assert_eq!(channel.peek(), None);
        assert_eq!(channel.available(), Ok(5));
        assert_eq!(channel.sender_address(), peer(2));

        let mut buf = [0u8; 10];
        assert_eq!(channel.read_into(&mut buf), 5);
        assert_eq!(&buf[..5], b"world");
    }

    #[test]
    fn test_begin_resets_state() {
        let (hardware, mut channel) = loopback_channel();
        hardware.inject(SocketId(0), peer(1), b"abc");
        assert_eq!(channel.available(), Ok(3));
        channel.begin_packet(peer(1)).unwrap();
        channel.write(1).unwrap();

        channel.begin(9999).unwrap();
        assert_eq!(channel.local_port(), Some(9999));
        assert_eq!(hardware.local_port(SocketId(0)), Some(9999));
        assert_eq!(channel.read(), None);
        assert_eq!(channel.begin_packet(peer(2)), Ok(()));
    }

    #[test]
    fn test_close() {
        let (_hardware, mut channel) = loopback_channel();
        channel.close();

        assert_eq!(channel.local_port(), None);
        assert_eq!(channel.available(), Err(ChannelError::NotBound));
        channel.write(1).unwrap();
        assert_eq!(channel.end_packet(), Err(ChannelError::NotBound));
    }

    #[test]
    fn test_available_requires_binding() {
        // no hardware call expected
        let mut channel = BytewiseChannel::new(Arc::new(MockHardwareSocket::new()), SocketRegistry::new(4), ChannelConfig::default_w5100()).unwrap();
        assert_eq!(channel.available(), Err(ChannelError::NotBound));
        assert_eq!(channel.read(), None);
    }

    #[test]
    fn test_close_discards_staged_datagram() {
        let (hardware, mut channel) = loopback_channel();
        hardware.inject(SocketId(0), peer(1), b"abc");
        assert_eq!(channel.available(), Ok(3));
        assert_eq!(channel.read(), Some(b'a'));

        channel.close();
        assert_eq!(channel.available(), Err(ChannelError::NotBound));
        assert_eq!(channel.read(), None);
    }
}
