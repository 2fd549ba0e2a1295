use anyhow::bail;
use crate::hardware::SocketFlags;

/// This is the size of a hardware socket's receive and transmit buffer on the W5100 with its
///  default memory split. No datagram can be larger than this minus the header overhead.
pub const HARDWARE_SOCKET_BUFFER_SIZE: usize = 2048;

/// What to do with bytes written to an assembly buffer that is already full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Ignore the byte without signalling anything. The packet is sent truncated.
    #[default]
    Drop,
    /// Refuse the byte with `ChannelError::BufferFull`. A slice that does not fit completely is
    ///  refused as a whole.
    Reject,
}

/// How the bulk channel treats datagrams that are bigger than the caller's receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveBounds {
    /// Hand the caller's buffer to the hardware as is. Excess payload is cut off by the
    ///  driver and lost.
    #[default]
    Passthrough,
    /// Check the next pending datagram's size against the buffer first, and fail with
    ///  `ChannelError::ReceiveBufferTooSmall` without consuming the datagram
    Enforce,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// This is the maximum payload of an assembled outbound packet. Bytes written beyond this
    ///  are handled according to `overflow_policy`.
    ///
    /// NB: This limits only packets assembled byte by byte - `send_datagram` passes buffers to
    ///  the hardware without checking their size.
    pub tx_packet_capacity: usize,

    /// Size of the bytewise channel's staging buffer, i.e. the maximum payload of a received
    ///  datagram. Longer datagrams are truncated when they are staged.
    pub rx_packet_capacity: usize,

    /// The number of bytes the chip adds to each datagram in its receive buffer, and that are
    ///  included in the queue depth it reports. For the W5100 this is 8: sender IP (4), sender
    ///  port (2), payload length (2).
    pub header_overhead: usize,

    pub overflow_policy: OverflowPolicy,
    pub receive_bounds: ReceiveBounds,

    pub socket_flags: SocketFlags,
}

impl ChannelConfig {
    /// The reference profile: Arduino Ethernet shield with a W5100 chip, silent on overflow
    pub fn default_w5100() -> ChannelConfig {
        ChannelConfig {
            tx_packet_capacity: 24,
            rx_packet_capacity: 24,
            header_overhead: 8,
            overflow_policy: OverflowPolicy::Drop,
            receive_bounds: ReceiveBounds::Passthrough,
            socket_flags: SocketFlags::empty(),
        }
    }

    /// Same as `default_w5100()`, but with overflow and oversized datagrams reported as errors
    pub fn strict_w5100() -> ChannelConfig {
        ChannelConfig {
            overflow_policy: OverflowPolicy::Reject,
            receive_bounds: ReceiveBounds::Enforce,
            ..Self::default_w5100()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.header_overhead >= HARDWARE_SOCKET_BUFFER_SIZE {
            bail!("header overhead of {} bytes does not fit the hardware buffer", self.header_overhead);
        }
        let max_payload = HARDWARE_SOCKET_BUFFER_SIZE - self.header_overhead;

        if self.tx_packet_capacity == 0 {
            bail!("tx packet capacity must not be 0");
        }
        if self.tx_packet_capacity > max_payload {
            bail!("tx packet capacity of {} exceeds the hardware limit of {}", self.tx_packet_capacity, max_payload);
        }
        if self.rx_packet_capacity == 0 {
            bail!("rx packet capacity must not be 0");
        }
        if self.rx_packet_capacity > max_payload {
            bail!("rx packet capacity of {} exceeds the hardware limit of {}", self.rx_packet_capacity, max_payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn config(tx: usize, rx: usize, overhead: usize) -> ChannelConfig {
        ChannelConfig {
            tx_packet_capacity: tx,
            rx_packet_capacity: rx,
            header_overhead: overhead,
            ..ChannelConfig::default_w5100()
        }
    }

    #[rstest]
    #[case::w5100(ChannelConfig::default_w5100(), true)]
    #[case::strict(ChannelConfig::strict_w5100(), true)]
    #[case::max(config(2040, 2040, 8), true)]
    #[case::no_overhead(config(2048, 2048, 0), true)]
    #[case::tx_zero(config(0, 24, 8), false)]
    #[case::rx_zero(config(24, 0, 8), false)]
    #[case::tx_too_big(config(2041, 24, 8), false)]
    #[case::rx_too_big(config(24, 2041, 8), false)]
    #[case::overhead_too_big(config(24, 24, 2048), false)]
    fn test_validate(#[case] config: ChannelConfig, #[case] expected_ok: bool) {
        assert_eq!(config.validate().is_ok(), expected_ok);
    }
}
