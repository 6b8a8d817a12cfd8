//! Replay captured HTTP traffic and diff the outcomes
//!
//! Open a capture with [`capture::PcapFile`], then let a [`replay::Replayer`] walk through it. Every HTTP request
//! found in a single TCP segment is sent again to a live target through a [`transport::Transport`], and the live
//! status code is compared with the captured response. Outcomes go to a [`report::Reporter`].
//!
//! The [`ip`] and [`link`] modules decode the headers needed to get from a raw frame to a TCP payload, and [`http`]
//! extracts HTTP messages from that payload.

pub mod capture;
pub mod cli;
pub mod config;
pub mod http;
pub mod ip;
pub mod link;
pub mod replay;
pub mod report;
pub mod transport;
