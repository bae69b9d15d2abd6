//! The message type handed to callers of [`Transport::recv`](::transport::Transport::recv).

use std::time::SystemTime;

/// A complete message as delivered to a receiver: the channel it was
/// published on, its payload, and the time this process received it.
///
/// Unlike the teacher's `Message`, this carries no `Marshall` bound — this
/// transport moves raw bytes and leaves interpreting them to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub channel: String,
    pub payload: Vec<u8>,
    pub recv_time: SystemTime,
}
