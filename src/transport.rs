//! The transport engine: the piece that ties packet framing, the ring
//! buffer, the fragment store, and the socket facade together behind the
//! public `Transport` contract.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use constants::*;
use error::{ConnectError, Error, RecvError, SendError, SubscribeError};
use fragstore::{FragmentStore, SenderKey};
use message::ReceivedMessage;
use ringbuf::RingBuffer;
use socket::{RecvSocket, SendSocket};
use wire::{self, Decoded, FragmentHeader};

/// The abstract transport contract from the surrounding pub/sub system's
/// point of view: MTU query, send, subscription-intent recording, and
/// blocking receive. `destroy()` has no explicit method here — dropping the
/// implementor releases its sockets, the idiomatic equivalent.
pub trait Transport {
    fn mtu(&self) -> usize;
    fn send(&mut self, channel: &str, payload: &[u8]) -> Result<(), Error>;
    fn subscribe_enable(&mut self, channel: Option<&str>, enable: bool) -> Result<(), Error>;
    fn recv(&mut self, timeout: RecvTimeout) -> Result<ReceivedMessage, Error>;
}

/// How long `recv` is willing to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeout {
    /// Wait indefinitely.
    Forever,
    /// Return immediately if nothing is available.
    Poll,
    /// Wait up to this many milliseconds.
    Millis(u64),
}

impl RecvTimeout {
    /// Mirrors the C-style convention this is drawn from: negative waits
    /// forever, zero polls, positive waits that many milliseconds.
    pub fn from_millis_signed(timeout_ms: i64) -> Self {
        if timeout_ms < 0 {
            RecvTimeout::Forever
        } else if timeout_ms == 0 {
            RecvTimeout::Poll
        } else {
            RecvTimeout::Millis(timeout_ms as u64)
        }
    }

    fn as_duration(&self) -> Option<Duration> {
        match *self {
            RecvTimeout::Forever => None,
            RecvTimeout::Poll => Some(Duration::from_millis(0)),
            RecvTimeout::Millis(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

/// Intent recorded by `subscribe_enable`. Multicast has no on-wire
/// per-channel subscription, so this only shapes what this process chooses
/// to hand upstream; the socket itself still receives everything on the
/// group.
#[derive(Debug, Default)]
struct SubscriptionState {
    all: bool,
    channels: HashMap<String, bool>,
}

impl SubscriptionState {
    fn set(&mut self, channel: Option<&str>, enable: bool) {
        match channel {
            None => self.all = enable,
            Some(c) => {
                self.channels.insert(c.to_owned(), enable);
            }
        }
    }
}

#[derive(Default)]
struct Stats {
    rx: u64,
    discarded_bad: u64,
    last_report: Option<Instant>,
}

impl Stats {
    /// Emits the periodic loss/buffer-pressure report, if warranted, and
    /// resets the window. Gated on `discarded_bad > 0 || low_watermark <
    /// 0.5`, so a quiet, healthy link stays silent — see SPEC_FULL.md §10.
    fn maybe_report(&mut self, low_watermark: f64) {
        let now = Instant::now();
        let due = self
            .last_report
            .map_or(true, |t| now.duration_since(t) >= STATS_REPORT_INTERVAL);
        if !due {
            return;
        }
        if self.discarded_bad > 0 || low_watermark < 0.5 {
            warn!(
                "udpm: rx={} discarded_bad={} ring_low_watermark={:.2}",
                self.rx, self.discarded_bad, low_watermark
            );
        }
        self.rx = 0;
        self.discarded_bad = 0;
        self.last_report = Some(now);
    }
}

/// The UDP multicast transport.
pub struct UdpmTransport {
    send_socket: SendSocket,
    recv_socket: RecvSocket,
    ring: RingBuffer,
    frag_store: FragmentStore,
    subscriptions: SubscriptionState,
    stats: Stats,
    msg_seqno: u32,
    low_watermark: f64,
    warned_small_kernel_buf: bool,
}

impl UdpmTransport {
    /// Connects a new transport to `group:port`, joining the multicast
    /// group for both directions.
    pub fn new(
        group: Ipv4Addr,
        port: u16,
        ttl: u8,
        requested_recv_buf_size: Option<usize>,
    ) -> Result<Self, ConnectError> {
        debug!(
            "connecting udpm transport (group={}, port={}, ttl={})",
            group, port, ttl
        );
        let send_socket = SendSocket::new(group, port, ttl)?;
        let recv_socket = RecvSocket::new(group, port, requested_recv_buf_size)?;

        Ok(UdpmTransport {
            send_socket,
            recv_socket,
            ring: RingBuffer::new(RINGBUF_SIZE),
            frag_store: FragmentStore::default(),
            subscriptions: SubscriptionState::default(),
            stats: Stats::default(),
            msg_seqno: 0,
            low_watermark: 1.0,
            warned_small_kernel_buf: false,
        })
    }

    /// Parses a `udpm://<group>:<port>?ttl=<n>&recv_buf_size=<bytes>` URL
    /// and connects. The hand-rolled parser mirrors the teacher's
    /// `parse_lcm_url`, generalized to this transport's own scheme and
    /// options rather than pulling in a URL-parsing crate.
    pub fn connect(url: &str) -> Result<Self, ConnectError> {
        let parsed = parse_udpm_url(url)?;
        UdpmTransport::new(
            parsed.group,
            parsed.port,
            parsed.ttl,
            parsed.recv_buf_size,
        )
    }

    fn update_low_watermark(&mut self) {
        let capacity = self.ring.capacity() as f64;
        if capacity == 0.0 {
            return;
        }
        let available = (capacity - self.ring.used() as f64) / capacity;
        if available < self.low_watermark {
            self.low_watermark = available;
        }
    }

    fn warn_if_kernel_buffer_small(&mut self, message_size: usize) {
        if self.warned_small_kernel_buf {
            return;
        }
        if let Ok(kernel_size) = self.recv_socket.recv_buf_size() {
            if kernel_size < KERNEL_RECV_BUF_WARN_THRESHOLD && message_size > kernel_size {
                warn!(
                    "udpm: kernel receive buffer is only {} bytes while a {}-byte message just arrived; \
                     consider raising recv_buf_size",
                    kernel_size, message_size
                );
                self.warned_small_kernel_buf = true;
            }
        }
    }

    /// Steps 2-6 of the receive algorithm: wait for, pull in, and parse one
    /// datagram, returning a completed message when one is ready.
    fn receive_one(&mut self, timeout: Option<Duration>) -> Option<ReceivedMessage> {
        let got_data = match self.recv_socket.wait_for_data(timeout) {
            Ok(got) => got,
            Err(e) => {
                debug!("udpm: wait_for_data failed: {}", e);
                return None;
            }
        };
        if !got_data {
            return None;
        }

        let region = match self.ring.alloc(MTU) {
            Ok(region) => region,
            Err(_) => {
                // Ring buffer exhausted; fall back to a heap buffer sized
                // for this one datagram, per §4.2.
                return self.receive_into_heap_buffer();
            }
        };

        let result = {
            let buf = self.ring.region_mut(region);
            self.recv_socket.recv_into(buf)
        };

        let message = match result {
            Ok((n, from, recv_time)) => {
                self.update_low_watermark();
                let bytes = {
                    let region_bytes = self.ring.region(region);
                    region_bytes[..n].to_vec()
                };
                self.warn_if_kernel_buffer_small(n);
                self.process_datagram(&bytes, from, recv_time)
            }
            Err(e) => {
                debug!("udpm: recv_into failed: {}", e);
                self.stats.discarded_bad += 1;
                None
            }
        };

        self.ring.release(region);
        message
    }

    fn receive_into_heap_buffer(&mut self) -> Option<ReceivedMessage> {
        let mut buf = vec![0u8; MTU];
        match self.recv_socket.recv_into(&mut buf) {
            Ok((n, from, recv_time)) => {
                buf.truncate(n);
                self.process_datagram(&buf, from, recv_time)
            }
            Err(e) => {
                debug!("udpm: recv_into (heap fallback) failed: {}", e);
                self.stats.discarded_bad += 1;
                None
            }
        }
    }

    fn process_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        recv_time: ::std::time::SystemTime,
    ) -> Option<ReceivedMessage> {
        match wire::decode(datagram) {
            Ok(Decoded::Short {
                channel, payload, ..
            }) => {
                self.stats.rx += 1;
                Some(ReceivedMessage {
                    channel: channel.to_owned(),
                    payload: payload.to_vec(),
                    recv_time,
                })
            }
            Ok(Decoded::Fragment {
                msg_seqno,
                total_size,
                fragment_offset,
                fragment_no,
                fragments_in_msg,
                channel,
                data,
            }) => self.process_fragment(
                from,
                msg_seqno,
                total_size,
                fragment_offset,
                fragment_no,
                fragments_in_msg,
                channel,
                data,
                recv_time,
            ),
            Err(e) => {
                debug!("udpm: dropping malformed datagram: {}", e);
                self.stats.discarded_bad += 1;
                None
            }
        }
    }

    fn process_fragment(
        &mut self,
        from: SocketAddr,
        msg_seqno: u32,
        total_size: u32,
        fragment_offset: u32,
        fragment_no: u16,
        fragments_in_msg: u16,
        channel: Option<&str>,
        data: &[u8],
        recv_time: ::std::time::SystemTime,
    ) -> Option<ReceivedMessage> {
        let ip = match from.ip() {
            ::std::net::IpAddr::V4(v4) => v4,
            ::std::net::IpAddr::V6(_) => {
                debug!("udpm: dropping fragment from an IPv6 sender; unsupported");
                self.stats.discarded_bad += 1;
                return None;
            }
        };
        let key = SenderKey {
            addr: ip,
            port: from.port(),
        };

        let stale = self
            .frag_store
            .get(&key)
            .map_or(false, |slot| slot.msg_seqno != msg_seqno || slot.total_size != total_size);
        if stale {
            trace!("udpm: dropping stale reassembly slot for {:?}", key);
            self.frag_store.remove(&key);
        }

        if self.frag_store.get(&key).is_none() {
            let channel = match (fragment_no, channel) {
                (0, Some(channel)) => channel.to_owned(),
                (0, None) => {
                    debug!("udpm: fragment 0 missing its channel prefix; dropping");
                    self.stats.discarded_bad += 1;
                    return None;
                }
                _ => {
                    trace!("udpm: dropping fragment {} with no slot to join (fragment 0 never arrived)", fragment_no);
                    self.stats.discarded_bad += 1;
                    return None;
                }
            };

            if let Err(e) = self
                .frag_store
                .insert(key, channel, msg_seqno, total_size, fragments_in_msg)
            {
                debug!("udpm: {}", e);
                self.stats.discarded_bad += 1;
                return None;
            }
        }

        self.frag_store.apply_fragment(&key, fragment_offset, data);

        match self.frag_store.take_if_complete(&key) {
            Some(slot) => {
                self.stats.rx += 1;
                Some(ReceivedMessage {
                    channel: slot.channel,
                    payload: slot.payload,
                    recv_time,
                })
            }
            None => None,
        }
    }

    fn send_short(&mut self, channel: &str, payload: &[u8]) -> Result<(), SendError> {
        let header = wire::build_short_header(self.msg_seqno);
        let mut channel_term = channel.as_bytes().to_vec();
        channel_term.push(0);
        let sent = self
            .send_socket
            .send_vectored(&header, Some(&channel_term), Some(payload))?;
        let expected = header.len() + channel_term.len() + payload.len();
        if sent != expected {
            return Err(SendError::ShortSend { sent, expected });
        }
        Ok(())
    }

    fn send_fragmented(&mut self, channel: &str, payload: &[u8]) -> Result<(), SendError> {
        let channel_term_len = channel.len() + 1;
        let payload_size = channel_term_len + payload.len();
        let fragment_size = FRAGMENT_MAX_PAYLOAD;
        let nfragments = (payload_size + fragment_size - 1) / fragment_size;
        if nfragments > 65535 {
            return Err(SendError::TooLarge(nfragments));
        }

        let mut channel_term = channel.as_bytes().to_vec();
        channel_term.push(0);

        let mut body_offset = 0usize;
        for fragment_no in 0..nfragments {
            let is_first = fragment_no == 0;
            let header = wire::build_fragment_header(&FragmentHeader {
                msg_seqno: self.msg_seqno,
                total_size: payload.len() as u32,
                fragment_offset: body_offset as u32,
                fragment_no: fragment_no as u16,
                fragments_in_msg: nfragments as u16,
            });

            let capacity_for_body = if is_first {
                fragment_size - channel_term_len
            } else {
                fragment_size
            };
            let take = capacity_for_body.min(payload.len() - body_offset);
            let body_slice = &payload[body_offset..body_offset + take];

            let sent = if is_first {
                self.send_socket
                    .send_vectored(&header, Some(&channel_term), Some(body_slice))?
            } else {
                self.send_socket.send_vectored(&header, Some(body_slice), None)?
            };
            let expected = header.len() + if is_first { channel_term_len } else { 0 } + take;
            if sent != expected {
                return Err(SendError::ShortSend { sent, expected });
            }

            body_offset += take;
        }

        Ok(())
    }
}

impl Transport for UdpmTransport {
    fn mtu(&self) -> usize {
        MTU
    }

    fn send(&mut self, channel: &str, payload: &[u8]) -> Result<(), Error> {
        if channel.is_empty() || channel.len() > CHANNEL_MAX_LEN {
            return Err(SendError::Invalid(format!(
                "channel name length {} is out of range",
                channel.len()
            ))
            .into());
        }
        if payload.len() > MTU {
            return Err(SendError::Invalid(format!(
                "payload of {} bytes exceeds MTU",
                payload.len()
            ))
            .into());
        }

        let payload_size = channel.len() + 1 + payload.len();
        let result = if payload_size <= SHORT_MESSAGE_MAX_SIZE {
            self.send_short(channel, payload)
        } else {
            self.send_fragmented(channel, payload)
        };

        result?;
        self.msg_seqno = self.msg_seqno.wrapping_add(1);
        Ok(())
    }

    fn subscribe_enable(&mut self, channel: Option<&str>, enable: bool) -> Result<(), Error> {
        if let Some(c) = channel {
            if c.len() > CHANNEL_MAX_LEN {
                return Err(SubscribeError::Invalid.into());
            }
        }
        self.subscriptions.set(channel, enable);
        Ok(())
    }

    fn recv(&mut self, timeout: RecvTimeout) -> Result<ReceivedMessage, Error> {
        let deadline = timeout.as_duration().map(|d| Instant::now() + d);

        loop {
            self.update_low_watermark();
            self.stats.maybe_report(self.low_watermark);

            let wait = deadline.map(|deadline| {
                deadline.saturating_duration_since(Instant::now())
            });

            if let Some(message) = self.receive_one(wait) {
                return Ok(message);
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(RecvError::Again.into());
                }
            }
        }
    }
}

/// The parsed pieces of a `udpm://` URL.
struct UdpmUrl {
    group: Ipv4Addr,
    port: u16,
    ttl: u8,
    recv_buf_size: Option<usize>,
}

/// Parses `udpm://<group>:<port>?ttl=<n>&recv_buf_size=<bytes>`.
///
/// Hand-rolled rather than built on a URL-parsing crate, mirroring the
/// teacher's own `parse_lcm_url`: split on `://`, then on the last `?`, then
/// the query string on `&` and `=`.
fn parse_udpm_url(url: &str) -> Result<UdpmUrl, ConnectError> {
    let after_scheme = {
        let idx = url.find("://").ok_or(ConnectError::InvalidUrl)?;
        let (scheme, rest) = url.split_at(idx);
        if scheme != "udpm" {
            return Err(ConnectError::UnknownScheme(scheme.to_owned()));
        }
        &rest[3..]
    };

    let (network, query) = match after_scheme.find('?') {
        Some(idx) => {
            let (n, q) = after_scheme.split_at(idx);
            (n, &q[1..])
        }
        None => (after_scheme, ""),
    };

    let (group_str, port_str) = network.rfind(':').map(|idx| network.split_at(idx)).ok_or(
        ConnectError::InvalidUrl,
    )?;
    let port_str = &port_str[1..];
    let group: Ipv4Addr = group_str.parse().map_err(|_| ConnectError::InvalidUrl)?;
    let port: u16 = port_str.parse().map_err(|_| ConnectError::InvalidUrl)?;

    let mut ttl = 0u8;
    let mut recv_buf_size = None;
    if !query.is_empty() {
        for pair in query.split('&') {
            let idx = pair.find('=').ok_or(ConnectError::InvalidUrl)?;
            let (key, value) = pair.split_at(idx);
            let value = &value[1..];
            match key {
                "ttl" => ttl = value.parse().map_err(|_| ConnectError::InvalidTtl)?,
                "recv_buf_size" => {
                    recv_buf_size =
                        Some(value.parse().map_err(|_| ConnectError::InvalidRecvBufSize)?)
                }
                _ => {}
            }
        }
    }

    Ok(UdpmUrl {
        group,
        port,
        ttl,
        recv_buf_size,
    })
}
