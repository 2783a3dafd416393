use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use lastfm_archive::api::ApiClient;
use lastfm_archive::driver::{Driver, RunState};
use lastfm_archive::store::Store;

#[derive(Parser, Debug)]
#[command(name = "lastfm-archive")]
#[command(about = "Archive Last.fm scrobbles as per-day JSON files", long_about = None)]
struct Args {
    /// Last.fm username
    #[arg(short, long)]
    username: String,

    /// Last.fm API key
    #[arg(short, long)]
    api_key: String,

    /// Directory for the per-day archives
    #[arg(short, long, default_value = "backup")]
    output: PathBuf,

    /// Page to start from (resume an interrupted run)
    #[arg(long, default_value_t = 1)]
    page: u64,

    /// Timestamp of the last archived scrobble (resume an interrupted run)
    #[arg(long)]
    timestamp: Option<i64>,

    /// The user was scrobbling when the interrupted run started
    #[arg(long, default_value_t = false)]
    currently_scrobbling: bool,

    /// Only capture the track that was playing when the run started
    #[arg(long, default_value_t = false)]
    collect_now_playing: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let api = ApiClient::new(&args.username, &args.api_key)?;
    let store = Store::new(&args.output)?;

    let mut driver = Driver::new(api, store);
    driver.run(RunState {
        page: args.page,
        timestamp: args.timestamp,
        is_currently_scrobbling: args.currently_scrobbling,
        collect_now_playing: args.collect_now_playing,
    })?;

    Ok(())
}
