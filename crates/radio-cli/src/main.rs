//! `radio`: command line front end for the playback core.
//!
//! - `play`: resolve and play a station, printing status and now-playing titles.
//! - `resolve`: print the media URLs a station or playlist URL expands to.
//! - `devices`: list output devices.

use anyhow::Result;
use clap::Parser;
use radio_cli::{cli, runtime};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,radio=info,radio_player=info")
        }))
        .init();

    let mut config = runtime::load_config(args.config.as_deref())?;

    match args.cmd {
        cli::Command::Play {
            url,
            device,
            volume,
            muted,
        } => {
            if device.is_some() {
                config.device = device;
            }
            if let Some(volume) = volume {
                config.volume = radio_player::config::clamp_volume(volume);
            }
            config.muted |= muted;

            let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
            let _ = ctrlc::set_handler(move || {
                let _ = shutdown_tx.try_send(());
            });
            runtime::run_play(config, &url, shutdown_rx)
        }
        cli::Command::Resolve { url } => runtime::run_resolve(&config, &url),
        cli::Command::Devices { json } => runtime::list_devices(json),
    }
}
