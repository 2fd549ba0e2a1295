use std::fmt::{Display, Formatter};

/// Failures surfaced by the UDP channels. Every variant is locally recoverable: the channel is
///  left in a clean state (cursors reset where it matters) and the caller may simply retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// `begin_packet` was called while a previously started packet has not been flushed yet
    AlreadyInFlight,
    /// a byte was written to a full assembly buffer with `OverflowPolicy::Reject` configured
    BufferFull,
    /// bytes were flushed before any destination was ever recorded
    NoDestination,
    /// the channel has no hardware socket (`begin` was not called, or it was closed)
    NotBound,
    /// the hardware send / receive primitive reported a failure
    Transfer { code: i32 },
    /// the pending datagram does not fit the caller's buffer (`ReceiveBounds::Enforce` only)
    ReceiveBufferTooSmall { pending: usize, capacity: usize },
    /// all hardware socket slots of the registry are in use
    NoFreeSocket,
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::AlreadyInFlight => write!(f, "a packet is already being assembled"),
            ChannelError::BufferFull => write!(f, "assembly buffer is full"),
            ChannelError::NoDestination => write!(f, "no destination was set for the packet"),
            ChannelError::NotBound => write!(f, "channel is not bound to a hardware socket"),
            ChannelError::Transfer { code } => write!(f, "hardware transfer failed with code {}", code),
            ChannelError::ReceiveBufferTooSmall { pending, capacity } =>
                write!(f, "pending datagram of {} bytes does not fit a buffer of {} bytes", pending, capacity),
            ChannelError::NoFreeSocket => write!(f, "no free hardware socket"),
        }
    }
}

impl std::error::Error for ChannelError {}
