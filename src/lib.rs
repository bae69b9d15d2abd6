//! A UDP multicast publish/subscribe datagram transport for local and
//! local-area communication between cooperating processes (robotics,
//! vehicle, and simulation nodes are the typical users of this style of
//! transport).
//!
//! This crate implements one layer: the wire protocol, the receive ring
//! buffer, the per-sender fragment reassembly store, the multicast socket
//! facade, and the engine coordinating them behind a single blocking
//! [`Transport`](transport::Transport) contract. It does not provide
//! reliability, ordering, flow control, encryption, authentication, or
//! discovery — see the crate-level docs in `DESIGN.md` for the full list of
//! non-goals and how they were decided.

#[macro_use]
extern crate log;

extern crate byteorder;
#[macro_use]
extern crate failure;
extern crate net2;

mod constants;

pub mod error;

mod wire;
pub use wire::WireError;

mod ringbuf;
pub use ringbuf::{RegionHandle, RingBuffer, RingBufferError};

mod fragstore;
pub use fragstore::{FragmentStore, InsertError, SenderKey};

mod socket;
pub use socket::{RecvSocket, SendSocket};

mod message;
pub use message::ReceivedMessage;

mod transport;
pub use transport::{RecvTimeout, Transport, UdpmTransport};
