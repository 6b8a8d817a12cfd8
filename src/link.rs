//! Strip link layer framing
//!
//! A capture file declares a link type for all of its packets. [`LinkLayer`] maps that declaration onto the framing
//! that has to be removed before the IPv4 header starts, and reports frames that don't carry IPv4 at all so they can
//! be skipped.

use std::fmt;

use thiserror::Error;

/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// BSD loopback address family for IPv4
const AF_INET: u32 = 2;

/// Length of an Ethernet header without a VLAN tag
const ETHERNET_HEADER: usize = 14;

/// Minimum frame size accepted by [`EthernetFrame::parse_from_bytes`]
const MIN_ETHERNET_FRAME: usize = 18;

/// Length of the BSD loopback pseudo header
const NULL_HEADER: usize = 4;

/// Length of the Linux cooked capture header
const SLL_HEADER: usize = 16;

/// Errors that can occur when stripping link layer framing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkParseErr {
    /// Frame is shorter than the link header
    #[error("{layer} frame needs at least {expected} bytes, only got {actual}")]
    Size {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Ethernet II frame
#[derive(Debug, Clone, Copy)]
pub struct EthernetFrame<'a> {
    /// Destination MAC
    pub dest: [u8; 6],
    /// Source MAC
    pub source: [u8; 6],
    /// Type of the encapsulated data
    pub ether_type: u16,
    /// Everything after the header. The frame check sequence is not removed.
    pub payload: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    /// Decode an Ethernet header
    ///
    /// # Errors
    /// Returns an error if the slice is smaller than 18 bytes.
    pub fn parse_from_bytes(data: &'a [u8]) -> Result<Self, LinkParseErr> {
        if data.len() < MIN_ETHERNET_FRAME {
            return Err(LinkParseErr::Size {
                layer: "Ethernet",
                expected: MIN_ETHERNET_FRAME,
                actual: data.len(),
            });
        }
        let mut dest = [0u8; 6];
        let mut source = [0u8; 6];
        dest.copy_from_slice(&data[0..6]);
        source.copy_from_slice(&data[6..12]);
        Ok(Self {
            dest,
            source,
            ether_type: u16::from_be_bytes([data[12], data[13]]),
            payload: &data[ETHERNET_HEADER..],
        })
    }
}

/// What a frame carries once the link header is gone
#[derive(Debug, PartialEq, Eq)]
pub enum Network<'a> {
    /// Bytes starting at an IPv4 header
    Ipv4(&'a [u8]),
    /// Anything else. Contains a short description for logging.
    Other(String),
}

/// Link layer framing of a capture
///
/// Selected from the link type declared by the capture file. See the
/// [tcpdump link type list](https://www.tcpdump.org/linktypes.html) for the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    /// BSD loopback, a 4 byte address family in host byte order
    Null,
    /// OpenBSD loopback, a 4 byte address family in network byte order
    Loop,
    /// Ethernet II
    Ethernet,
    /// No link header, packets start at the IP header
    Raw,
    /// Linux cooked capture
    LinuxSll,
    /// Link type this crate does not understand
    Unsupported(i32),
}

impl LinkLayer {
    /// Map a pcap link type number to its framing
    #[must_use]
    pub fn from_linktype(linktype: i32) -> Self {
        match linktype {
            0 => Self::Null,
            1 => Self::Ethernet,
            // libpcap reports a LINKTYPE_RAW (101) file as DLT_RAW, which is 12 outside of OpenBSD.
            // 228 is LINKTYPE_IPV4
            12 | 101 | 228 => Self::Raw,
            108 => Self::Loop,
            113 => Self::LinuxSll,
            other => Self::Unsupported(other),
        }
    }

    /// Strip the link header off of a frame
    ///
    /// # Errors
    /// Returns an error if the frame is too short to hold the link header.
    pub fn strip<'a>(&self, frame: &'a [u8]) -> Result<Network<'a>, LinkParseErr> {
        match self {
            Self::Null | Self::Loop => {
                check_len("Loopback", NULL_HEADER, frame)?;
                let bytes = [frame[0], frame[1], frame[2], frame[3]];
                let big = u32::from_be_bytes(bytes);
                let little = u32::from_le_bytes(bytes);
                // DLT_NULL is written in the byte order of the capturing host
                let is_inet = match self {
                    Self::Loop => big == AF_INET,
                    _ => big == AF_INET || little == AF_INET,
                };
                if is_inet {
                    Ok(Network::Ipv4(&frame[NULL_HEADER..]))
                } else {
                    Ok(Network::Other(format!("address family {little}")))
                }
            }
            Self::Ethernet => {
                let eth = EthernetFrame::parse_from_bytes(frame)?;
                if eth.ether_type == ETHERTYPE_IPV4 {
                    Ok(Network::Ipv4(eth.payload))
                } else {
                    Ok(Network::Other(format!("EtherType {:#06x}", eth.ether_type)))
                }
            }
            Self::Raw => match frame.first().map(|b| b >> 4) {
                Some(4) => Ok(Network::Ipv4(frame)),
                Some(v) => Ok(Network::Other(format!("IP version {v}"))),
                None => Err(LinkParseErr::Size {
                    layer: "Raw IP",
                    expected: 1,
                    actual: 0,
                }),
            },
            Self::LinuxSll => {
                check_len("Linux cooked", SLL_HEADER, frame)?;
                let proto = u16::from_be_bytes([frame[14], frame[15]]);
                if proto == ETHERTYPE_IPV4 {
                    Ok(Network::Ipv4(&frame[SLL_HEADER..]))
                } else {
                    Ok(Network::Other(format!("protocol {proto:#06x}")))
                }
            }
            Self::Unsupported(linktype) => Ok(Network::Other(format!("link type {linktype}"))),
        }
    }
}

impl fmt::Display for LinkLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "BSD loopback"),
            Self::Loop => write!(f, "OpenBSD loopback"),
            Self::Ethernet => write!(f, "Ethernet"),
            Self::Raw => write!(f, "raw IP"),
            Self::LinuxSll => write!(f, "Linux cooked"),
            Self::Unsupported(linktype) => write!(f, "unsupported link type {linktype}"),
        }
    }
}

fn check_len(layer: &'static str, expected: usize, frame: &[u8]) -> Result<(), LinkParseErr> {
    if frame.len() < expected {
        return Err(LinkParseErr::Size {
            layer,
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}
