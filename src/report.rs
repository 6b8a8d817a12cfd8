//! Report replay outcomes
//!
//! The [`Replayer`](crate::replay::Replayer) tells a [`Reporter`] about every request it sent, every comparison it
//! made and every frame it gave up on. [`LogReporter`] turns those into log lines, which is the only output of a
//! normal run.

use std::error::Error;
use std::fmt::Write;

use http::{StatusCode, Uri};

use crate::http::{HttpParseErr, HttpRequest};
use crate::replay::{ExchangeRecord, ReplayError};

/// Why a frame did not lead to a replay or a comparison
#[derive(Debug)]
pub enum SkipReason<'a> {
    /// Frame does not carry IPv4. Contains a description of what it carries instead.
    NotIpv4(&'a str),
    /// IPv4 packet does not carry TCP. Contains the protocol number.
    NotTcp(u8),
    /// Request could not be turned into a URL for the live target
    Unroutable(&'a HttpParseErr),
    /// An error that the configured policy says to skip
    Failed(&'a ReplayError),
}

/// Receives replay outcomes
pub trait Reporter {
    /// A captured request was replayed and the live target answered with `live`
    fn sent(&mut self, request: &HttpRequest, url: &Uri, live: StatusCode);

    /// The captured response status matched the live one
    fn passed(&mut self, exchange: &ExchangeRecord, captured: StatusCode);

    /// The captured response status did not match the live one
    fn mismatch(&mut self, exchange: &ExchangeRecord, captured: StatusCode);

    /// Frame number `frame`, counted from 1, was skipped
    fn skipped(&mut self, frame: u64, reason: SkipReason<'_>);
}

/// Reporter writing to the `log` facade
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn sent(&mut self, request: &HttpRequest, url: &Uri, live: StatusCode) {
        log::info!("sent {} {}: {}", request.method, url, live.as_u16());
    }

    fn passed(&mut self, exchange: &ExchangeRecord, captured: StatusCode) {
        log::info!(
            "passed {} {}: captured={} actual={}",
            exchange.request.method,
            exchange.url,
            captured.as_u16(),
            exchange.live_status.as_u16()
        );
    }

    fn mismatch(&mut self, exchange: &ExchangeRecord, captured: StatusCode) {
        log::error!(
            "mismatch {} {}: captured={} actual={}",
            exchange.request.method,
            exchange.url,
            captured.as_u16(),
            exchange.live_status.as_u16()
        );
    }

    fn skipped(&mut self, frame: u64, reason: SkipReason<'_>) {
        match reason {
            SkipReason::NotIpv4(what) => log::debug!("frame {frame}: not an IPv4 packet ({what})"),
            SkipReason::NotTcp(proto) => {
                log::info!("frame {frame}: not a TCP packet (protocol {proto}); continue to the next packet")
            }
            SkipReason::Unroutable(err) => log::warn!("frame {frame}: cannot replay request: {}", chain(err)),
            SkipReason::Failed(err) => log::warn!("frame {frame}: skipped: {}", chain(err)),
        }
    }
}

/// Render an error and all of its sources on one line
pub fn chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(out, ": {cause}");
        source = cause.source();
    }
    out
}
