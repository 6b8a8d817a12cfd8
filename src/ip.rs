//! Decode IPv4 and TCP headers
//!
//! This module has functionality and limitations very specific to its use case. Do not use this as a general
//! purpose packet parsing module.
//!
//! Both decoders work on borrowed byte slices and never copy. The returned [`Ipv4Header`] and [`TcpSegment`] views
//! borrow from the frame they were decoded from, so they are only usable for as long as that frame is. Anything that
//! needs to outlive the current frame has to be copied out explicitly.
//!
//! No checksums are validated.

use std::fmt;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use thiserror::Error;

/// IP protocol number for TCP
pub const PROTO_TCP: u8 = 6;

/// IP protocol number for UDP
pub const PROTO_UDP: u8 = 17;

/// Size of an IPv4 header without options
const MIN_IPV4_HEADER: usize = 20;

/// Size of a TCP header without options
const MIN_TCP_HEADER: usize = 20;

/// Errors that can occur when decoding an IPv4 header
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Ipv4ParseErr {
    /// Not enough bytes to be an IP header. Minimum of 20. Contains size of passed buffer.
    #[error("IPv4 header is 20 bytes, only passed a buffer of size {0}")]
    Size(usize),
    /// IP packet was not version 4. Contains the parsed version.
    #[error("Found version {0}, expected 4")]
    Version(u8),
    /// IHL field is below 5 or describes a header longer than the buffer
    #[error("IHL field {ihl} is invalid for a buffer of {available} bytes")]
    InvalidIhl { ihl: u8, available: usize },
    /// Total length field is larger than the buffer or smaller than the header
    #[error("Total length field {declared} does not fit the {available} bytes available")]
    InvalidTotalLength { declared: usize, available: usize },
}

/// Errors that can occur when decoding a TCP segment
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TcpParseErr {
    /// Not enough bytes to be a TCP packet. Minimum of 20 bytes.
    #[error("Data is too small to be a TCP packet {0}")]
    Size(usize),
    /// The value of the data offset field is too large for passed in data, or smaller than the minimum header
    #[error("Header declares {declared} bytes but {available} bytes are available")]
    InvalidDataOffset { declared: usize, available: usize },
}

/// Borrowed view of an IPv4 header and the data it carries
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header<'a> {
    /// Version, always 4 for a successfully decoded header
    pub version: u8,
    /// Internet Header Length in 32 bit words
    pub ihl: u8,
    /// Differentiated Services Code Point
    pub dscp: u8,
    /// Explicit Congestion Notification
    pub ecn: u8,
    /// Total Length
    ///
    /// Length of the IP packet including its header, as declared by the packet itself.
    pub total_len: u16,
    /// Identification
    pub id: u16,
    /// Flags
    ///
    /// The three high bits of the fragmentation word.
    pub flags: u8,
    /// Fragment Offset, in units of 64 bits
    pub frag_off: u16,
    /// Time to Live
    pub ttl: u8,
    /// Protocol number of the encapsulated data
    pub protocol: u8,
    /// Header Checksum
    pub checksum: u16,
    /// Source Address
    pub source: Ipv4Addr,
    /// Destination Address
    pub dest: Ipv4Addr,
    /// IP options
    ///
    /// Empty unless the IHL field is greater than 5.
    pub options: &'a [u8],
    /// Encapsulated data
    ///
    /// Bounded by the total length field, not by the size of the buffer. Any trailing link layer padding is excluded.
    pub payload: &'a [u8],
}

impl<'a> Ipv4Header<'a> {
    /// Decode an IPv4 header out of a slice of bytes
    ///
    /// # Errors
    /// Returns an error if the slice is smaller than 20 bytes, the version is not 4, or the IHL or total length fields
    /// describe more data than the slice holds.
    pub fn parse_from_bytes(data: &'a [u8]) -> Result<Self, Ipv4ParseErr> {
        if data.len() < MIN_IPV4_HEADER {
            return Err(Ipv4ParseErr::Size(data.len()));
        }
        let version = data[0] >> 4;
        if version != 4 {
            return Err(Ipv4ParseErr::Version(version));
        }
        let ihl = data[0] & 0xf;
        let header_len = ihl as usize * 4;
        if header_len < MIN_IPV4_HEADER || header_len > data.len() {
            return Err(Ipv4ParseErr::InvalidIhl {
                ihl,
                available: data.len(),
            });
        }
        let total_len = u16::from_be_bytes([data[2], data[3]]);
        let declared = total_len as usize;
        if declared > data.len() || declared < header_len {
            return Err(Ipv4ParseErr::InvalidTotalLength {
                declared,
                available: data.len(),
            });
        }
        Ok(Self {
            version,
            ihl,
            dscp: data[1] >> 2,
            ecn: data[1] & 0x3,
            total_len,
            id: u16::from_be_bytes([data[4], data[5]]),
            flags: data[6] >> 5,
            frag_off: u16::from_be_bytes([data[6] & 0x1f, data[7]]),
            ttl: data[8],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[10], data[11]]),
            source: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dest: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            options: &data[MIN_IPV4_HEADER..header_len],
            payload: &data[header_len..declared],
        })
    }

    /// Length of the header including options, in bytes
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    /// Whether the encapsulated data is a TCP segment
    #[must_use]
    pub fn is_tcp(&self) -> bool {
        self.protocol == PROTO_TCP
    }
}

impl fmt::Display for Ipv4Header<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IPv4 Header")
            .field("Total length", &self.total_len)
            .field("Protocol", &self.protocol)
            .field("Source addr", &self.source)
            .field("Dest addr", &self.dest)
            .finish_non_exhaustive()
    }
}

bitflags! {
    /// TCP control bits
    ///
    /// The six control bits of RFC 793, at their positions in the 14th byte of the header.
    pub struct TcpFlags: u8 {
        /// Indicates that the urgent pointer field is set
        const URG = 0b10_0000;
        /// Indicates that the acknowledgement field of the header is significant
        const ACK = 0b1_0000;
        /// Indicates that there is data that needs to be forwarded to the application
        const PSH = 0b1000;
        /// Reset the connection
        const RST = 0b100;
        /// Synchronize sequence numbers
        const SYN = 0b10;
        /// Indicates that the packet is the last one from the sender
        const FIN = 0b1;
    }
}

/// Borrowed view of a TCP header and its data
#[derive(Clone, Copy)]
pub struct TcpSegment<'a> {
    /// Source port
    pub source: u16,
    /// Destination port
    pub dest: u16,
    /// Sequence number
    pub seq: u32,
    /// Acknowledge number
    pub ack: u32,
    /// Data offset, the header length in 32 bit words
    pub data_off: u8,
    /// TCP flags such as reset, ack, push, etc.
    pub flags: TcpFlags,
    /// Window size
    pub window: u16,
    /// Checksum value
    pub checksum: u16,
    /// Urgent pointer
    pub urg: u16,
    /// Option bytes, empty if the header has no options
    pub options: &'a [u8],
    /// TCP data
    pub payload: &'a [u8],
}

impl fmt::Debug for TcpSegment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TCP Segment")
            .field("Source port", &self.source)
            .field("Dest port", &self.dest)
            .field("Seq", &self.seq)
            .field("Ack", &self.ack)
            .field("Flags", &self.flags)
            .field("Data len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

impl<'a> TcpSegment<'a> {
    /// Decode a TCP header and data out of a slice of bytes
    ///
    /// This is meant to be called with the [`Ipv4Header::payload`] of a TCP packet.
    ///
    /// # Errors
    /// Returns an error if there are not enough bytes for the fixed header or for the header length declared by the
    /// data offset field.
    pub fn parse_from_bytes(data: &'a [u8]) -> Result<Self, TcpParseErr> {
        if data.len() < MIN_TCP_HEADER {
            return Err(TcpParseErr::Size(data.len()));
        }
        let data_off = data[12] >> 4;
        let header_len = data_off as usize * 4;
        if header_len < MIN_TCP_HEADER || header_len > data.len() {
            return Err(TcpParseErr::InvalidDataOffset {
                declared: header_len,
                available: data.len(),
            });
        }
        Ok(Self {
            source: u16::from_be_bytes([data[0], data[1]]),
            dest: u16::from_be_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            data_off,
            flags: TcpFlags::from_bits_truncate(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            checksum: u16::from_be_bytes([data[16], data[17]]),
            urg: u16::from_be_bytes([data[18], data[19]]),
            options: &data[MIN_TCP_HEADER..header_len],
            payload: &data[header_len..],
        })
    }

    /// Length of the header including options, in bytes
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.data_off as usize * 4
    }
}
