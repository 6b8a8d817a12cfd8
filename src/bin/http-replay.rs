use anyhow::Context;
use clap::Parser;

use http_replay::capture::PcapFile;
use http_replay::cli::Cli;
use http_replay::replay::Replayer;
use http_replay::report::LogReporter;
use http_replay::transport::HttpTransport;

fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.config();

    let mut source = PcapFile::open(&cli.capture)?;
    let transport = HttpTransport::new(config.timeout);
    let mut replayer = Replayer::new(config, transport, LogReporter);
    let summary = replayer
        .run(&mut source)
        .with_context(|| format!("replay of {} failed", cli.capture.display()))?;

    log::info!("done: {summary}");
    Ok(())
}
