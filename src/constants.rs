//! Compile-time configuration constants for the transport.
//!
//! These mirror the values a deployment would otherwise pass on the command
//! line or bake into a build profile for an embedded target; they're kept as
//! `const`s here rather than runtime configuration because the wire format
//! itself (header sizes, magic numbers) is fixed by them.

use std::time::Duration;

/// Largest complete message this transport will carry, in bytes.
pub const MTU: usize = 1 << 20;

/// Upper bound on a channel name's length, in bytes.
pub const CHANNEL_MAX_LEN: usize = 63;

/// Target size for outgoing datagrams. Kept comfortably under a typical
/// Ethernet MTU so that messages don't fragment a second time at the IP
/// layer.
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// magic(4) + msg_seqno(4)
pub const SHORT_HEADER_SIZE: usize = 8;

/// magic(4) + msg_seqno(4) + total_size(4) + fragment_offset(4)
/// + fragment_no(2) + fragments_in_msg(2)
pub const FRAG_HEADER_SIZE: usize = 20;

/// Largest `channel_len + 1 + payload_len` that still fits in a single short
/// datagram.
pub const SHORT_MESSAGE_MAX_SIZE: usize = MAX_DATAGRAM_SIZE - SHORT_HEADER_SIZE;

/// Largest number of body bytes (channel prefix not included) carried by one
/// fragment datagram.
pub const FRAGMENT_MAX_PAYLOAD: usize = MAX_DATAGRAM_SIZE - FRAG_HEADER_SIZE;

/// Size of the byte arena backing received datagrams.
pub const RINGBUF_SIZE: usize = 32 * 1024 * 1024;

/// Ceiling on the combined size of all in-flight reassembly payloads.
pub const MAX_FRAG_BUF_TOTAL_SIZE: usize = 64 * 1024 * 1024;

/// Ceiling on the number of distinct senders with an in-flight reassembly at
/// once.
pub const MAX_NUM_FRAG_BUFS: usize = 256;

/// Initial pool size hint for empty receive buffers. Kept for parity with
/// the transport's external interface; this implementation doesn't pool
/// buffers explicitly since the ring buffer already serves that purpose; see
/// DESIGN.md.
pub const DEFAULT_RECV_BUFS: usize = 32;

/// Below this kernel receive-buffer size, a large incoming message triggers
/// a one-shot warning.
pub const KERNEL_RECV_BUF_WARN_THRESHOLD: usize = 256 * 1024;

/// How often the receive loop is willing to emit a loss/buffer-pressure
/// report.
pub const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Magic number identifying a short (single-datagram) packet.
pub const MAGIC_SHORT: u32 = 0x4D43_5030;

/// Magic number identifying a fragment packet.
pub const MAGIC_LONG: u32 = 0x4D43_5031;
