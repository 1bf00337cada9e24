use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "radio", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML file with player settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a station until Ctrl-C or the stream ends
    Play {
        /// Station URL, playlist URL or local file path
        url: String,

        /// Output device id or name substring
        #[arg(long)]
        device: Option<String>,

        /// Volume in 0.0..=1.0
        #[arg(long)]
        volume: Option<f32>,

        /// Start muted
        #[arg(long)]
        muted: bool,
    },

    /// Print the candidate media URLs a station URL resolves to
    Resolve {
        url: String,
    },

    /// List output devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_flags_parse() {
        let args = Args::parse_from([
            "radio",
            "--config",
            "radio.toml",
            "play",
            "http://example.com/live.pls",
            "--device",
            "USB",
            "--volume",
            "0.4",
            "--muted",
        ]);
        assert_eq!(args.config.as_deref(), Some(std::path::Path::new("radio.toml")));
        let Command::Play {
            url,
            device,
            volume,
            muted,
        } = args.cmd
        else {
            panic!("expected play");
        };
        assert_eq!(url, "http://example.com/live.pls");
        assert_eq!(device.as_deref(), Some("USB"));
        assert_eq!(volume, Some(0.4));
        assert!(muted);
    }
}
