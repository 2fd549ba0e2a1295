//! UDP send / receive buffering on top of a socket offload chip (W5100 style).
//!
//! The chip does the actual networking. It exposes a small number of hardware sockets with
//!  primitive calls that move whole byte ranges to / from its on-chip buffers (see
//!  [hardware::HardwareSocket]). This crate adds the buffer discipline on top that lets an
//!  application build a datagram one byte at a time, and consume a received datagram one byte
//!  at a time, without losing bytes or re-reading stale data.
//!
//! ## Channels
//!
//! There are two independent channel types, each owning one hardware socket:
//! * [bulk::BulkChannel] sends and receives whole caller-supplied buffers, plus a single-shot
//!   'assemble then send' path for outbound packets
//! * [bytewise::BytewiseChannel] assembles outbound packets byte by byte, and stages one
//!   received datagram at a time locally, serving it byte by byte. The hardware is polled again
//!   only after the staged datagram is used up.
//!
//! Both are driven entirely by the caller - there are no threads, timers or blocking calls, and
//!  all receive operations are polls.
//!
//! Hardware sockets are handed out by a [registry::SocketRegistry], so several channels can
//!  share one chip without stepping on each other's sockets.
//!
//! ## Outbound
//!
//! ```ascii
//! begin_packet(to) -> write(b)* -> end_packet()
//! ```
//!
//! There is at most one packet in flight: `begin_packet` fails while bytes are pending. Bytes
//!  written to a full buffer are dropped silently by default (`OverflowPolicy::Drop`), so the
//!  packet is sent truncated.
//!
//! ## Inbound queue depth
//!
//! The chip prepends a header to every received datagram in its buffer (8 bytes on the W5100:
//!  sender IP, sender port, payload length), and the queue depth it reports is the sum over
//!  all pending datagrams, headers included:
//!
//! ```ascii
//! 0: sender IP (4 bytes)
//! 4: sender port (u16 BE)
//! 6: payload length (u16 BE)
//! 8: payload
//! ```
//!
//! `BulkChannel::available` reports this depth verbatim, while `BytewiseChannel::available`
//!  reports payload bytes. The difference is intentional and preserved.
//!
//! With more than one datagram pending, the depth says nothing about the size of the next one.
//!  Where that size matters, it is read from the head datagram's header
//!  (`HardwareSocket::next_datagram_len`).
//!
//! ## Errors
//!
//! Nothing here is fatal. All failures are reported as [error::ChannelError] and leave the
//!  channel in a clean state so the caller can just retry.

pub mod assembly;
pub mod bulk;
pub mod bytewise;
pub mod config;
pub mod error;
pub mod hardware;
pub mod registry;
pub mod staging;
pub mod test_util;
