use std::path::PathBuf;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use lantrack::app_log::setup_logger;
use lantrack::config::Config;
use lantrack::playback::sink::{AudioSink, NullSink};
use lantrack::view::{ConsoleView, View};
use lantrack::{identity, runtime};

/// Serverless LAN-local collaborative jukebox: peer discovery, a TCP
/// mesh, and weighted-bully leader election with no central server.
#[derive(Parser, Debug)]
#[command(name = "lantrackd", version, about)]
struct Cli {
    /// Display name used for both the election rank and node identity.
    #[arg(long, default_value = "anonymous")]
    name: String,

    /// Shared passphrase identity is derived from, alongside `--name`.
    #[arg(long, default_value = "")]
    password: String,

    /// Optional TOML config file; missing file falls back to defaults.
    #[arg(long, default_value = "lantrack.toml")]
    config: PathBuf,

    /// Directory for the rotating log file (defaults to `logs/` next to
    /// the executable).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logger(cli.log_dir.clone(), cli.verbose)?;

    let config = Config::load_from_file(&cli.config)?;
    let self_id = identity::derive_node_id(&cli.name, &cli.password);
    log::info!("starting lantrackd as \"{}\" (node_id={})", cli.name, self_id);

    let sink: Box<dyn AudioSink> = Box::new(NullSink::new());
    let rng: Box<dyn rand::RngCore + Send> = Box::new(StdRng::from_entropy());
    let view: Box<dyn View> = Box::new(ConsoleView);

    runtime::run(config, self_id, cli.name, sink, rng, view).await
}
