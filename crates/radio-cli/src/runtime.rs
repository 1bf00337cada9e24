//! Command bodies for the `radio` binary.

use std::path::Path;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, select};
use radio_player::{PlaybackStatus, Player, PlayerConfig, PlayerEvent, Resolver, device};

/// Load the config file when given, defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<PlayerConfig> {
    match path {
        Some(path) => PlayerConfig::load(path),
        None => Ok(PlayerConfig::default()),
    }
}

/// Print the output devices of the default host.
pub fn list_devices(json: bool) -> Result<()> {
    let host = cpal::default_host();
    let devices = device::list_device_infos(&host)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    for (i, d) in devices.iter().enumerate() {
        let marker = if d.is_default { "*" } else { " " };
        println!(
            "{marker}#{i}: {} [{}] {}-{} Hz",
            d.name, d.id, d.min_rate, d.max_rate
        );
    }
    Ok(())
}

/// Resolve `url` and print one candidate per line.
pub fn run_resolve(config: &PlayerConfig, url: &str) -> Result<()> {
    let candidates = Resolver::new(config)
        .resolve(url)
        .with_context(|| format!("resolve {url}"))?;
    for candidate in candidates {
        println!("{candidate}");
    }
    Ok(())
}

/// Play `url` and print status and now-playing changes until the session ends or
/// `shutdown` fires.
///
/// Returns an error when playback ends in the error state.
pub fn run_play(config: PlayerConfig, url: &str, shutdown: Receiver<()>) -> Result<()> {
    let player = Player::new(config).context("start player")?;
    let events = player.subscribe();
    player.play(url);

    loop {
        select! {
            recv(shutdown) -> _ => {
                tracing::info!("stopping");
                player.stop();
                return Ok(());
            }
            recv(events) -> msg => {
                let Ok(event) = msg else {
                    return Ok(());
                };
                match event {
                    PlayerEvent::NowPlayingChanged(title) if !title.is_empty() => {
                        println!("now playing: {title}")
                    }
                    PlayerEvent::NowPlayingChanged(_) => {}
                    PlayerEvent::StatusChanged(PlaybackStatus::Error(failure)) => {
                        eprintln!("{}", failure.message);
                        anyhow::bail!("playback failed ({:?}): {}", failure.code, failure.detail);
                    }
                    PlayerEvent::StatusChanged(PlaybackStatus::Stopped) => {
                        tracing::info!("playback stopped");
                        return Ok(());
                    }
                    PlayerEvent::StatusChanged(status) => {
                        tracing::info!(status = ?status, "status");
                    }
                }
            }
        }
    }
}
