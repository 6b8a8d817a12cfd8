//! Read captured packets
//!
//! A [`PacketSource`] hands out raw frames one at a time, in capture file order. The frame returned by
//! [`PacketSource::next_frame`] borrows the source, so it has to be dropped before the next frame is read. Anything
//! that should survive longer than that must be copied out.
//!
//! [`PcapFile`] reads classic pcap and pcapng files through libpcap.

use std::path::Path;

use pcap::{Capture, Offline};
use thiserror::Error;

use crate::link::LinkLayer;

/// Errors that can occur when reading a capture
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Failed to open the capture file
    #[error("Failed to open capture {path}")]
    Open {
        path: String,
        #[source]
        source: pcap::Error,
    },
    /// Failed to read the next packet out of the capture container
    #[error("Failed to read packet from capture")]
    Read(#[source] pcap::Error),
}

/// Source of captured frames
pub trait PacketSource {
    /// Link layer framing shared by every frame of this source
    fn link_layer(&self) -> LinkLayer;

    /// Read the next frame
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    ///
    /// # Errors
    /// Returns an error if the capture container could not be read.
    fn next_frame(&mut self) -> Result<Option<&[u8]>, CaptureError>;
}

/// Offline capture backed by a pcap or pcapng file
pub struct PcapFile {
    capture: Capture<Offline>,
    link: LinkLayer,
}

impl PcapFile {
    /// Open a capture file
    ///
    /// # Errors
    /// Returns an error if the file does not exist or is not a capture libpcap understands.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let capture = Capture::from_file(path).map_err(|source| CaptureError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let link = LinkLayer::from_linktype(capture.get_datalink().0);
        log::debug!("opened {} with {} framing", path.display(), link);
        Ok(Self { capture, link })
    }
}

impl PacketSource for PcapFile {
    fn link_layer(&self) -> LinkLayer {
        self.link
    }

    fn next_frame(&mut self) -> Result<Option<&[u8]>, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Some(packet.data)),
            Err(pcap::Error::NoMorePackets) => Ok(None),
            Err(e) => Err(CaptureError::Read(e)),
        }
    }
}
