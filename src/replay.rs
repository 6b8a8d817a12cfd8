//! Replay captured HTTP requests and compare the outcomes
//!
//! Create a [`Replayer`] with a [`ReplayConfig`], a [`Transport`] and a [`Reporter`], then hand it a
//! [`PacketSource`] with [`Replayer::run`]. Frames are handled strictly in capture order, one at a time:
//!
//! 1. The link header is stripped according to the capture's link type and the IPv4 and TCP headers are decoded.
//!    Frames that are not IPv4 or not TCP are skipped.
//! 2. A segment whose acknowledgment number already has an [`ExchangeRecord`] is a duplicate and is skipped.
//! 3. A segment carrying an HTTP request is replayed against `{scheme}://{Host}{target}`. The live status is stored
//!    in a new [`ExchangeRecord`] keyed by the segment's acknowledgment number.
//! 4. A segment carrying an HTTP response is matched to the record keyed by its sequence number. Without any other
//!    exchange in between, a server answers with exactly the sequence number the client acknowledged when it sent the
//!    request. The captured status is then compared with the live one.
//!
//! There is no stream reassembly, so only messages whose header block fits in one segment are seen. Connections that
//! share sequence space in the same capture can be mismatched.
//!
//! Header decode failures and failed round trips either end the run or are skipped, depending on the
//! [`ErrorPolicy`] set for them. Reading the capture itself failing always ends the run.

use std::collections::HashMap;
use std::fmt;

use http::{StatusCode, Uri};
use thiserror::Error;

use crate::capture::{CaptureError, PacketSource};
use crate::config::{ErrorPolicy, ReplayConfig};
use crate::http::{HttpMessage, HttpRequest, HttpResponse};
use crate::ip::{Ipv4Header, Ipv4ParseErr, TcpParseErr, TcpSegment};
use crate::link::{LinkLayer, LinkParseErr, Network};
use crate::report::{Reporter, SkipReason};
use crate::transport::{Transport, TransportError};

/// Errors that can end a replay
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read the capture")]
    Capture(#[from] CaptureError),
    #[error("Failed to parse link layer frame")]
    Link(#[from] LinkParseErr),
    #[error("Failed to parse IPv4 packet")]
    Ipv4(#[from] Ipv4ParseErr),
    #[error("Failed to parse TCP segment")]
    Tcp(#[from] TcpParseErr),
    #[error("Failed to send a HTTP request")]
    Transport(#[from] TransportError),
}

impl ReplayError {
    /// Whether the error comes from decoding a frame's headers
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Link(_) | Self::Ipv4(_) | Self::Tcp(_))
    }
}

/// A replayed request and what came of it
#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    /// Request as captured
    pub request: HttpRequest,
    /// URL the request was replayed against
    pub url: Uri,
    /// Status the live target answered with
    pub live_status: StatusCode,
    /// Status of the captured response, once one has been matched
    pub captured_status: Option<StatusCode>,
}

/// Exchanges of a single run, keyed by the acknowledgment number of the request segment
#[derive(Debug, Default)]
pub struct SessionState {
    exchanges: HashMap<u32, ExchangeRecord>,
}

impl SessionState {
    #[must_use]
    pub fn contains(&self, key: u32) -> bool {
        self.exchanges.contains_key(&key)
    }

    #[must_use]
    pub fn get(&self, key: u32) -> Option<&ExchangeRecord> {
        self.exchanges.get(&key)
    }

    /// Store a record unless `key` already has one
    ///
    /// Returns false, leaving the existing record alone, if the key was taken.
    pub fn insert(&mut self, key: u32, record: ExchangeRecord) -> bool {
        if self.exchanges.contains_key(&key) {
            return false;
        }
        self.exchanges.insert(key, record);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    fn get_mut(&mut self, key: u32) -> Option<&mut ExchangeRecord> {
        self.exchanges.get_mut(&key)
    }
}

/// Counters for a finished run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Frames read from the capture
    pub frames: u64,
    /// Frames not carrying IPv4
    pub not_ipv4: u64,
    /// IPv4 packets not carrying TCP
    pub not_tcp: u64,
    /// Segments skipped because their exchange was already seen
    pub duplicates: u64,
    /// Requests sent to the live target
    pub replayed: u64,
    /// Requests that could not be turned into a URL
    pub unroutable: u64,
    /// Comparisons where both statuses agreed
    pub passed: u64,
    /// Comparisons where the statuses differed
    pub mismatched: u64,
    /// Errors skipped by policy
    pub errors_skipped: u64,
    /// Exchange records held at the end of the run
    pub exchanges: usize,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} replayed, {} passed, {} mismatched, {} duplicates, {} non-IPv4, {} non-TCP, {} unroutable, \
             {} errors skipped",
            self.frames,
            self.replayed,
            self.passed,
            self.mismatched,
            self.duplicates,
            self.not_ipv4,
            self.not_tcp,
            self.unroutable,
            self.errors_skipped
        )
    }
}

/// Drives a differential replay
pub struct Replayer<T, R> {
    config: ReplayConfig,
    transport: T,
    reporter: R,
}

impl<T: Transport, R: Reporter> Replayer<T, R> {
    #[must_use]
    pub fn new(config: ReplayConfig, transport: T, reporter: R) -> Self {
        Self {
            config,
            transport,
            reporter,
        }
    }

    /// Replay every frame of `source`
    ///
    /// The run ends successfully once the source is exhausted.
    ///
    /// # Errors
    /// Returns an error if the capture can't be read, or on the first decode or transport error whose policy is
    /// [`ErrorPolicy::Abort`].
    pub fn run<S: PacketSource>(&mut self, source: &mut S) -> Result<ReplaySummary, ReplayError> {
        let link = source.link_layer();
        if let LinkLayer::Unsupported(_) = link {
            log::warn!("capture uses {link}, every frame will be skipped");
        }
        let mut session = SessionState::default();
        let mut summary = ReplaySummary::default();
        while let Some(frame) = source.next_frame()? {
            summary.frames += 1;
            let index = summary.frames;
            if let Err(err) = self.handle_frame(link, frame, index, &mut session, &mut summary) {
                match self.policy(&err) {
                    ErrorPolicy::Abort => {
                        log::error!("aborting replay at frame {index}");
                        return Err(err);
                    }
                    ErrorPolicy::Skip => {
                        summary.errors_skipped += 1;
                        self.reporter.skipped(index, SkipReason::Failed(&err));
                    }
                }
            }
        }
        summary.exchanges = session.len();
        Ok(summary)
    }

    /// Give back the transport and reporter
    pub fn into_parts(self) -> (T, R) {
        (self.transport, self.reporter)
    }

    fn policy(&self, err: &ReplayError) -> ErrorPolicy {
        match err {
            ReplayError::Transport(_) => self.config.transport_errors,
            err if err.is_decode() => self.config.decode_errors,
            _ => ErrorPolicy::Abort,
        }
    }

    fn handle_frame(
        &mut self,
        link: LinkLayer,
        frame: &[u8],
        index: u64,
        session: &mut SessionState,
        summary: &mut ReplaySummary,
    ) -> Result<(), ReplayError> {
        let packet = match link.strip(frame)? {
            Network::Ipv4(packet) => packet,
            Network::Other(what) => {
                summary.not_ipv4 += 1;
                self.reporter.skipped(index, SkipReason::NotIpv4(&what));
                return Ok(());
            }
        };
        let ip = Ipv4Header::parse_from_bytes(packet)?;
        if !ip.is_tcp() {
            summary.not_tcp += 1;
            self.reporter.skipped(index, SkipReason::NotTcp(ip.protocol));
            return Ok(());
        }
        let segment = TcpSegment::parse_from_bytes(ip.payload)?;

        if session.contains(segment.ack) {
            log::trace!("frame {index}: ack {} already replayed", segment.ack);
            summary.duplicates += 1;
            return Ok(());
        }

        match HttpMessage::parse(segment.payload) {
            Ok(HttpMessage::Request(request)) => {
                self.replay_request(request, segment.ack, index, session, summary)
            }
            Ok(HttpMessage::Response(response)) => {
                self.compare(&response, segment.seq, summary, session);
                Ok(())
            }
            // not HTTP, or not the start of a message
            Err(_) => Ok(()),
        }
    }

    fn replay_request(
        &mut self,
        request: HttpRequest,
        key: u32,
        index: u64,
        session: &mut SessionState,
        summary: &mut ReplaySummary,
    ) -> Result<(), ReplayError> {
        let url = match request.canonical_url(self.config.scheme) {
            Ok(url) => url,
            Err(err) => {
                summary.unroutable += 1;
                self.reporter.skipped(index, SkipReason::Unroutable(&err));
                return Ok(());
            }
        };
        let live_status = self.transport.send(&request, &url)?;
        summary.replayed += 1;
        self.reporter.sent(&request, &url, live_status);
        session.insert(
            key,
            ExchangeRecord {
                request,
                url,
                live_status,
                captured_status: None,
            },
        );
        Ok(())
    }

    fn compare(
        &mut self,
        response: &HttpResponse,
        key: u32,
        summary: &mut ReplaySummary,
        session: &mut SessionState,
    ) {
        let Some(record) = session.get_mut(key) else {
            return;
        };
        if record.captured_status.is_some() {
            summary.duplicates += 1;
            return;
        }
        let captured = response.status;
        record.captured_status = Some(captured);
        if captured == record.live_status {
            summary.passed += 1;
            self.reporter.passed(record, captured);
        } else {
            summary.mismatched += 1;
            self.reporter.mismatch(record, captured);
        }
    }
}

#[cfg(test)]
mod replay_testing {
    use super::*;
    use crate::config::Scheme;

    /// Frames held in memory, raw IP framing
    struct Frames {
        frames: Vec<Vec<u8>>,
        next: usize,
    }

    impl PacketSource for Frames {
        fn link_layer(&self) -> LinkLayer {
            LinkLayer::Raw
        }

        fn next_frame(&mut self) -> Result<Option<&[u8]>, CaptureError> {
            let frame = self.frames.get(self.next);
            self.next += 1;
            Ok(frame.map(Vec::as_slice))
        }
    }

    struct FixedStatus {
        status: StatusCode,
        calls: Vec<String>,
    }

    impl Transport for FixedStatus {
        fn send(&mut self, request: &HttpRequest, url: &Uri) -> Result<StatusCode, TransportError> {
            self.calls.push(format!("{} {}", request.method, url));
            Ok(self.status)
        }
    }

    #[derive(Default)]
    struct Outcomes {
        passed: Vec<(u16, u16)>,
        mismatched: Vec<(u16, u16)>,
        skipped: Vec<u64>,
    }

    impl Reporter for Outcomes {
        fn sent(&mut self, _request: &HttpRequest, _url: &Uri, _live: StatusCode) {}

        fn passed(&mut self, exchange: &ExchangeRecord, captured: StatusCode) {
            self.passed
                .push((captured.as_u16(), exchange.live_status.as_u16()));
        }

        fn mismatch(&mut self, exchange: &ExchangeRecord, captured: StatusCode) {
            self.mismatched
                .push((captured.as_u16(), exchange.live_status.as_u16()));
        }

        fn skipped(&mut self, frame: u64, _reason: SkipReason<'_>) {
            self.skipped.push(frame);
        }
    }

    fn segment(seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
        let total = 40 + payload.len();
        let mut data = vec![
            0x45, 0x00, (total >> 8) as u8, total as u8, 0x00, 0x01, 0x40, 0x00, 0x40, 0x06, 0x00,
            0x00, 10, 0, 0, 1, 10, 0, 0, 2,
        ];
        data.extend_from_slice(&[0xc3, 0x50, 0x00, 0x50]);
        data.extend_from_slice(&seq.to_be_bytes());
        data.extend_from_slice(&ack.to_be_bytes());
        data.extend_from_slice(&[0x50, 0x18, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00]);
        data.extend_from_slice(payload);
        data
    }

    fn replay(
        frames: Vec<Vec<u8>>,
        live: u16,
        config: ReplayConfig,
    ) -> (Result<ReplaySummary, ReplayError>, FixedStatus, Outcomes) {
        let transport = FixedStatus {
            status: StatusCode::from_u16(live).unwrap(),
            calls: Vec::new(),
        };
        let mut replayer = Replayer::new(config, transport, Outcomes::default());
        let mut source = Frames { frames, next: 0 };
        let result = replayer.run(&mut source);
        let (transport, outcomes) = replayer.into_parts();
        (result, transport, outcomes)
    }

    const REQUEST: &[u8] = b"GET /foo HTTP/1.1\r\nHost: x\r\n\r\n";
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

    #[test]
    fn request_and_response_correlate() {
        let frames = vec![segment(100, 5000, REQUEST), segment(5000, 130, RESPONSE)];
        let (result, transport, outcomes) = replay(frames, 200, ReplayConfig::default());
        let summary = result.unwrap();
        assert_eq!(transport.calls, ["GET http://x/foo"]);
        assert_eq!(outcomes.passed, [(200, 200)]);
        assert!(outcomes.mismatched.is_empty());
        assert_eq!(summary.replayed, 1);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.exchanges, 1);
    }

    #[test]
    fn status_mismatch_is_reported() {
        let frames = vec![segment(100, 5000, REQUEST), segment(5000, 130, RESPONSE)];
        let (result, _, outcomes) = replay(frames, 404, ReplayConfig::default());
        assert_eq!(result.unwrap().mismatched, 1);
        assert_eq!(outcomes.mismatched, [(200, 404)]);
        assert!(outcomes.passed.is_empty());
    }

    #[test]
    fn duplicate_request_sent_once() {
        let frames = vec![
            segment(100, 5000, REQUEST),
            segment(100, 5000, REQUEST),
            segment(5000, 130, RESPONSE),
            segment(5000, 130, RESPONSE),
        ];
        let config = ReplayConfig::default().with_scheme(Scheme::Https);
        let (result, transport, outcomes) = replay(frames, 200, config);
        let summary = result.unwrap();
        assert_eq!(transport.calls, ["GET https://x/foo"]);
        assert_eq!(summary.exchanges, 1);
        assert_eq!(summary.duplicates, 2);
        assert_eq!(outcomes.passed.len(), 1);
    }

    #[test]
    fn uncorrelated_response_is_ignored() {
        let frames = vec![segment(100, 5000, REQUEST), segment(7000, 130, RESPONSE)];
        let (result, _, outcomes) = replay(frames, 200, ReplayConfig::default());
        let summary = result.unwrap();
        assert_eq!(summary.passed + summary.mismatched, 0);
        assert!(outcomes.passed.is_empty());
        assert!(outcomes.mismatched.is_empty());
    }

    #[test]
    fn udp_is_skipped() {
        let mut udp = segment(1, 1, b"");
        udp[9] = 17;
        let frames = vec![udp, segment(100, 5000, REQUEST)];
        let (result, transport, outcomes) = replay(frames, 200, ReplayConfig::default());
        let summary = result.unwrap();
        assert_eq!(summary.not_tcp, 1);
        assert_eq!(transport.calls.len(), 1);
        assert_eq!(outcomes.skipped, [1]);
    }

    #[test]
    fn truncated_packet_policy() {
        let mut truncated = segment(1, 1, b"");
        truncated[3] = 0xff;
        let frames = vec![truncated, segment(100, 5000, REQUEST)];

        let (result, transport, _) = replay(frames.clone(), 200, ReplayConfig::default());
        assert!(matches!(
            result,
            Err(ReplayError::Ipv4(Ipv4ParseErr::InvalidTotalLength { declared: 255, .. }))
        ));
        assert!(transport.calls.is_empty());

        let config = ReplayConfig::default().with_decode_errors(ErrorPolicy::Skip);
        let (result, transport, outcomes) = replay(frames, 200, config);
        assert_eq!(result.unwrap().errors_skipped, 1);
        assert_eq!(transport.calls.len(), 1);
        assert_eq!(outcomes.skipped, [1]);
    }

    #[test]
    fn request_without_host_is_not_sent() {
        let frames = vec![segment(100, 5000, b"GET / HTTP/1.0\r\n\r\n")];
        let (result, transport, _) = replay(frames, 200, ReplayConfig::default());
        assert_eq!(result.unwrap().unroutable, 1);
        assert!(transport.calls.is_empty());
    }

    #[test]
    fn session_keeps_first_record() {
        let mut session = SessionState::default();
        let record = ExchangeRecord {
            request: HttpRequest::parse(REQUEST).unwrap(),
            url: "http://x/foo".parse().unwrap(),
            live_status: StatusCode::OK,
            captured_status: None,
        };
        let mut other = record.clone();
        other.live_status = StatusCode::NOT_FOUND;
        assert!(session.insert(5000, record));
        assert!(!session.insert(5000, other));
        assert_eq!(session.len(), 1);
        assert_eq!(session.get(5000).unwrap().live_status, StatusCode::OK);
    }
}
