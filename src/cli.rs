//! Command line flags of the `http-replay` binary

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::{ErrorPolicy, ReplayConfig, Scheme};

#[derive(Parser, Debug)]
#[command(
    name = "http-replay",
    version,
    about = "Replay captured HTTP requests against a live target and compare the status codes"
)]
pub struct Cli {
    /// Use TLS to send the requests
    #[arg(long)]
    pub tls: bool,

    /// Timeout for each live request, in seconds
    #[arg(long, default_value_t = 10, value_parser = validate_timeout)]
    pub timeout: u64,

    /// What to do with a packet whose headers can't be decoded
    #[arg(long, default_value = "abort")]
    pub on_decode_error: PolicyArg,

    /// What to do when a live request fails or times out
    #[arg(long, default_value = "abort")]
    pub on_transport_error: PolicyArg,

    /// pcap or pcapng file to replay
    pub capture: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Abort,
    Skip,
}

impl From<PolicyArg> for ErrorPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Abort => Self::Abort,
            PolicyArg::Skip => Self::Skip,
        }
    }
}

fn validate_timeout(s: &str) -> Result<u64, String> {
    let val: u64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val == 0 {
        Err("timeout must be at least 1 second".to_string())
    } else {
        Ok(val)
    }
}

impl Cli {
    /// Settings for the replay described by the flags
    pub fn config(&self) -> ReplayConfig {
        ReplayConfig::default()
            .with_scheme(Scheme::from_tls(self.tls))
            .with_timeout(Duration::from_secs(self.timeout))
            .with_decode_errors(self.on_decode_error.into())
            .with_transport_errors(self.on_transport_error.into())
    }
}
