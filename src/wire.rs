//! Encoding and decoding of the two on-wire packet framings.
//!
//! All multi-byte header fields are network byte order. A *short* packet
//! carries a complete message in one datagram; a *fragment* packet carries
//! part of a message too large for that, with fragment 0 additionally
//! carrying the channel name ahead of its data.

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};
use std::str;

use constants::*;

/// A decode failure. Every variant corresponds to a `BAD_PACKET` condition;
/// the caller drops the datagram and counts it rather than propagating this.
#[derive(Debug, Fail, PartialEq, Eq)]
pub enum WireError {
    #[fail(display = "datagram too short to contain a header")]
    TooShort,

    #[fail(display = "unrecognized magic number 0x{:08x}", _0)]
    BadMagic(u32),

    #[fail(display = "channel name missing its NUL terminator")]
    ChannelNotTerminated,

    #[fail(display = "channel name of length {} exceeds CHANNEL_MAX_LEN", _0)]
    ChannelTooLong(usize),

    #[fail(display = "channel name is not valid UTF-8")]
    ChannelNotUtf8,

    #[fail(display = "declared message size {} exceeds MTU", _0)]
    MessageTooLarge(u32),

    #[fail(
        display = "fragment offset {} + size {} exceeds declared total {}",
        offset, size, total
    )]
    FragmentOverflow { offset: u32, size: u32, total: u32 },
}

/// A datagram successfully parsed down to its framing, borrowing from the
/// original buffer.
pub enum Decoded<'a> {
    /// A complete message delivered in a single datagram.
    Short {
        msg_seqno: u32,
        channel: &'a str,
        payload: &'a [u8],
    },

    /// One fragment of a larger message. `channel` is `Some` only for
    /// fragment 0.
    Fragment {
        msg_seqno: u32,
        total_size: u32,
        fragment_offset: u32,
        fragment_no: u16,
        fragments_in_msg: u16,
        channel: Option<&'a str>,
        data: &'a [u8],
    },
}

/// Parses a raw datagram into its framing.
pub fn decode(datagram: &[u8]) -> Result<Decoded, WireError> {
    if datagram.len() < SHORT_HEADER_SIZE {
        return Err(WireError::TooShort);
    }

    match NetworkEndian::read_u32(&datagram[0..4]) {
        MAGIC_SHORT => decode_short(datagram),
        MAGIC_LONG => decode_fragment(datagram),
        other => Err(WireError::BadMagic(other)),
    }
}

fn decode_short(datagram: &[u8]) -> Result<Decoded, WireError> {
    let msg_seqno = NetworkEndian::read_u32(&datagram[4..8]);
    let (channel, payload) = split_channel(&datagram[SHORT_HEADER_SIZE..])?;
    Ok(Decoded::Short {
        msg_seqno,
        channel,
        payload,
    })
}

fn decode_fragment(datagram: &[u8]) -> Result<Decoded, WireError> {
    if datagram.len() < FRAG_HEADER_SIZE {
        return Err(WireError::TooShort);
    }

    let msg_seqno = NetworkEndian::read_u32(&datagram[4..8]);
    let total_size = NetworkEndian::read_u32(&datagram[8..12]);
    let fragment_offset = NetworkEndian::read_u32(&datagram[12..16]);
    let fragment_no = NetworkEndian::read_u16(&datagram[16..18]);
    let fragments_in_msg = NetworkEndian::read_u16(&datagram[18..20]);

    if total_size as usize > MTU {
        return Err(WireError::MessageTooLarge(total_size));
    }

    let rest = &datagram[FRAG_HEADER_SIZE..];
    let (channel, data) = if fragment_no == 0 {
        let (channel, data) = split_channel(rest)?;
        (Some(channel), data)
    } else {
        (None, rest)
    };

    let frag_size = data.len() as u32;
    let end = fragment_offset
        .checked_add(frag_size)
        .filter(|&end| end <= total_size);
    if end.is_none() {
        return Err(WireError::FragmentOverflow {
            offset: fragment_offset,
            size: frag_size,
            total: total_size,
        });
    }

    Ok(Decoded::Fragment {
        msg_seqno,
        total_size,
        fragment_offset,
        fragment_no,
        fragments_in_msg,
        channel,
        data,
    })
}

/// Splits a NUL-terminated channel name off the front of `data`, returning
/// the channel and the remaining bytes.
fn split_channel(data: &[u8]) -> Result<(&str, &[u8]), WireError> {
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or(WireError::ChannelNotTerminated)?;
    if nul > CHANNEL_MAX_LEN {
        return Err(WireError::ChannelTooLong(nul));
    }
    let channel = str::from_utf8(&data[..nul]).map_err(|_| WireError::ChannelNotUtf8)?;
    Ok((channel, &data[nul + 1..]))
}

/// Fixed-size short-packet header, ready to hand to a vectored send.
pub fn build_short_header(msg_seqno: u32) -> [u8; SHORT_HEADER_SIZE] {
    let mut buf = [0u8; SHORT_HEADER_SIZE];
    {
        let mut w = &mut buf[..];
        w.write_u32::<NetworkEndian>(MAGIC_SHORT).unwrap();
        w.write_u32::<NetworkEndian>(msg_seqno).unwrap();
    }
    buf
}

/// The fields of one fragment-packet header.
pub struct FragmentHeader {
    pub msg_seqno: u32,
    pub total_size: u32,
    pub fragment_offset: u32,
    pub fragment_no: u16,
    pub fragments_in_msg: u16,
}

/// Fixed-size fragment-packet header, ready to hand to a vectored send.
pub fn build_fragment_header(hdr: &FragmentHeader) -> [u8; FRAG_HEADER_SIZE] {
    let mut buf = [0u8; FRAG_HEADER_SIZE];
    {
        let mut w = &mut buf[..];
        w.write_u32::<NetworkEndian>(MAGIC_LONG).unwrap();
        w.write_u32::<NetworkEndian>(hdr.msg_seqno).unwrap();
        w.write_u32::<NetworkEndian>(hdr.total_size).unwrap();
        w.write_u32::<NetworkEndian>(hdr.fragment_offset).unwrap();
        w.write_u16::<NetworkEndian>(hdr.fragment_no).unwrap();
        w.write_u16::<NetworkEndian>(hdr.fragments_in_msg).unwrap();
    }
    buf
}

#[cfg(test)]
mod test {
    use super::*;

    fn short_datagram(seqno: u32, channel: &str, payload: &[u8]) -> Vec<u8> {
        let mut buf = build_short_header(seqno).to_vec();
        buf.extend_from_slice(channel.as_bytes());
        buf.push(0);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn round_trips_a_short_packet() {
        let datagram = short_datagram(7, "t", &[0x01, 0x02, 0x03]);
        match decode(&datagram).unwrap() {
            Decoded::Short {
                msg_seqno,
                channel,
                payload,
            } => {
                assert_eq!(msg_seqno, 7);
                assert_eq!(channel, "t");
                assert_eq!(payload, &[0x01, 0x02, 0x03]);
            }
            Decoded::Fragment { .. } => panic!("expected a short packet"),
        }
    }

    #[test]
    fn rejects_datagrams_shorter_than_the_short_header() {
        let buf = [0u8; 4];
        assert_eq!(decode(&buf).unwrap_err(), WireError::TooShort);
    }

    #[test]
    fn rejects_unrecognized_magic() {
        let mut buf = vec![0u8; SHORT_HEADER_SIZE];
        NetworkEndian::write_u32(&mut buf[0..4], 0xDEAD_BEEF);
        assert_eq!(decode(&buf).unwrap_err(), WireError::BadMagic(0xDEAD_BEEF));
    }

    #[test]
    fn rejects_unterminated_channel() {
        let mut buf = build_short_header(0).to_vec();
        buf.extend_from_slice(b"no-terminator");
        assert_eq!(decode(&buf).unwrap_err(), WireError::ChannelNotTerminated);
    }

    #[test]
    fn rejects_overlong_channel() {
        let channel = "x".repeat(CHANNEL_MAX_LEN + 1);
        let datagram = short_datagram(0, &channel, &[]);
        match decode(&datagram).unwrap_err() {
            WireError::ChannelTooLong(n) => assert_eq!(n, CHANNEL_MAX_LEN + 1),
            other => panic!("expected ChannelTooLong, got {:?}", other),
        }
    }

    #[test]
    fn decodes_fragment_zero_with_embedded_channel() {
        let hdr = build_fragment_header(&FragmentHeader {
            msg_seqno: 3,
            total_size: 3000,
            fragment_offset: 0,
            fragment_no: 0,
            fragments_in_msg: 3,
        });
        let mut buf = hdr.to_vec();
        buf.extend_from_slice(b"big\0");
        buf.extend_from_slice(&[0xABu8; 100]);

        match decode(&buf).unwrap() {
            Decoded::Fragment {
                msg_seqno,
                total_size,
                fragment_offset,
                fragment_no,
                fragments_in_msg,
                channel,
                data,
            } => {
                assert_eq!(msg_seqno, 3);
                assert_eq!(total_size, 3000);
                assert_eq!(fragment_offset, 0);
                assert_eq!(fragment_no, 0);
                assert_eq!(fragments_in_msg, 3);
                assert_eq!(channel, Some("big"));
                assert_eq!(data.len(), 100);
            }
            Decoded::Short { .. } => panic!("expected a fragment packet"),
        }
    }

    #[test]
    fn non_zero_fragments_carry_no_channel() {
        let hdr = build_fragment_header(&FragmentHeader {
            msg_seqno: 3,
            total_size: 3000,
            fragment_offset: 1020,
            fragment_no: 1,
            fragments_in_msg: 3,
        });
        let mut buf = hdr.to_vec();
        buf.extend_from_slice(&[0xABu8; 1020]);

        match decode(&buf).unwrap() {
            Decoded::Fragment { channel, data, .. } => {
                assert_eq!(channel, None);
                assert_eq!(data.len(), 1020);
            }
            Decoded::Short { .. } => panic!("expected a fragment packet"),
        }
    }

    #[test]
    fn rejects_fragment_declaring_size_over_mtu() {
        let hdr = build_fragment_header(&FragmentHeader {
            msg_seqno: 0,
            total_size: (MTU as u32) + 1,
            fragment_offset: 0,
            fragment_no: 0,
            fragments_in_msg: 1,
        });
        let mut buf = hdr.to_vec();
        buf.extend_from_slice(b"c\0");
        match decode(&buf).unwrap_err() {
            WireError::MessageTooLarge(sz) => assert_eq!(sz, (MTU as u32) + 1),
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn rejects_fragment_overflowing_total_size() {
        let hdr = build_fragment_header(&FragmentHeader {
            msg_seqno: 0,
            total_size: 10,
            fragment_offset: 8,
            fragment_no: 1,
            fragments_in_msg: 2,
        });
        let mut buf = hdr.to_vec();
        buf.extend_from_slice(&[0u8; 5]); // 8 + 5 > 10
        match decode(&buf).unwrap_err() {
            WireError::FragmentOverflow { offset, size, total } => {
                assert_eq!((offset, size, total), (8, 5, 10));
            }
            other => panic!("expected FragmentOverflow, got {:?}", other),
        }
    }
}
