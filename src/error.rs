//! Error types associated with transport operations.
//!
//! As with most `failure`-based error modules, a caller that doesn't want to
//! match on the specific failure can collapse everything into [`Error`] with
//! `?`; a caller that does want to recover (e.g. retry on `RecvError::Again`)
//! can hold onto the narrower type instead.

use std::io;

/// A generic transport error, covering every operation.
#[derive(Debug, Fail)]
pub enum Error {
    /// Failed to construct the transport (bad URL, socket/multicast setup).
    #[fail(display = "failed to connect the transport")]
    Connect(#[cause] ConnectError),

    /// Failed to publish a message.
    #[fail(display = "failed to send a message")]
    Send(#[cause] SendError),

    /// Failed to change the receive filter.
    #[fail(display = "failed to update subscription state")]
    Subscribe(#[cause] SubscribeError),

    /// Failed to receive a message.
    #[fail(display = "failed to receive a message")]
    Recv(#[cause] RecvError),
}
impl From<ConnectError> for Error {
    fn from(err: ConnectError) -> Self {
        Error::Connect(err)
    }
}
impl From<SendError> for Error {
    fn from(err: SendError) -> Self {
        Error::Send(err)
    }
}
impl From<SubscribeError> for Error {
    fn from(err: SubscribeError) -> Self {
        Error::Subscribe(err)
    }
}
impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        Error::Recv(err)
    }
}

/// The transport could not be constructed.
///
/// Corresponds to the `CONNECT` status code of the abstract transport
/// interface.
#[derive(Debug, Fail)]
pub enum ConnectError {
    /// An IO error happened while setting up the sockets (bind, multicast
    /// join, etc).
    #[fail(display = "socket setup failed")]
    Io(#[cause] io::Error),

    /// The supplied URL was not a valid `udpm://` URL.
    #[fail(display = "invalid udpm URL")]
    InvalidUrl,

    /// The URL named a scheme other than `udpm`.
    #[fail(display = "unknown transport scheme \"{}\"", _0)]
    UnknownScheme(String),

    /// The `ttl` query option was present but not a valid `u8`.
    #[fail(display = "invalid ttl value")]
    InvalidTtl,

    /// The `recv_buf_size` query option was present but not a valid `usize`.
    #[fail(display = "invalid recv_buf_size value")]
    InvalidRecvBufSize,
}
impl From<io::Error> for ConnectError {
    fn from(err: io::Error) -> Self {
        ConnectError::Io(err)
    }
}

/// Publishing a message failed.
///
/// Corresponds to the `INVALID` and `UNKNOWN` status codes of the abstract
/// transport interface.
#[derive(Debug, Fail)]
pub enum SendError {
    /// The channel name or payload size was out of range.
    #[fail(display = "{}", _0)]
    Invalid(String),

    /// The message would require more than 65535 fragments.
    #[fail(display = "message requires {} fragments, the limit is 65535", _0)]
    TooLarge(usize),

    /// The socket accepted fewer bytes than the datagram was long.
    #[fail(display = "short send: wrote {} of {} bytes", sent, expected)]
    ShortSend { sent: usize, expected: usize },

    /// An IO error happened while sending.
    #[fail(display = "send failed")]
    Io(#[cause] io::Error),
}
impl From<io::Error> for SendError {
    fn from(err: io::Error) -> Self {
        SendError::Io(err)
    }
}

/// Updating the receive filter failed.
///
/// Corresponds to the `INVALID` status code of the abstract transport
/// interface.
#[derive(Debug, Fail)]
pub enum SubscribeError {
    /// The channel name was out of range.
    #[fail(display = "channel name exceeds CHANNEL_MAX_LEN")]
    Invalid,
}

/// No message was available, or the transport was shut down while waiting.
///
/// Corresponds to the `AGAIN` status code of the abstract transport
/// interface. Per the transport's failure semantics, a closed socket during
/// a blocked receive is folded into this variant rather than surfaced as a
/// distinct error.
#[derive(Debug, Fail)]
pub enum RecvError {
    /// The timeout elapsed (or, for a zero timeout, nothing was immediately
    /// available) before a complete message arrived.
    #[fail(display = "no message available")]
    Again,
}
