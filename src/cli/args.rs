//! CLI argument parsing using clap.

use clap::{
    Parser,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::{LoggingConfig, Settings};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Push changed map tile coordinates to WebSocket subscribers
#[derive(Parser, Debug)]
#[command(
    name = "tilewatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Push changed map tile coordinates to WebSocket subscribers",
    long_about = "Watches <WEBROOT>/maps/<dataset>/tiles and sends {\"lod\",\"x\",\"z\"} to \
                  clients connected at ws://<bind>:<port>/<dataset>.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Renderer webroot containing maps/<dataset>/tiles
    pub webroot: PathBuf,

    /// Address to bind the WebSocket server to [default: 0.0.0.0]
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port to bind the WebSocket server to [default: 8765]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Increase verbosity (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Overlay command-line values onto loaded settings.
    ///
    /// `-v` only raises the default level; per-module overrides stay.
    pub fn apply(&self, settings: &mut Settings) {
        settings.webroot = Some(self.webroot.clone());
        if let Some(bind) = &self.bind {
            settings.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.verbose > 0 {
            settings.logging.default = LoggingConfig::level_for_verbosity(self.verbose).to_string();
        }
    }
}
