//! Roster: mirror Discord voice channel occupancy into a Google Sheet.
//!
//! Every option can also be set through its `ROSTER_*` environment variable.

use std::path::PathBuf;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;

#[derive(Parser, Debug)]
#[command(name = "roster")]
#[command(about = "Mirror voice channel occupancy into a Google Sheet", long_about = None)]
struct Cli {
    /// Voice channel ids to monitor (comma-separated)
    #[arg(long, env = "ROSTER_CHANNEL_IDS", value_delimiter = ',', required = true)]
    channel_ids: Vec<String>,

    /// Spreadsheet id from the sheet URL
    #[arg(long, env = "ROSTER_SPREADSHEET_ID")]
    spreadsheet_id: String,

    /// Tab holding the roster
    #[arg(long, env = "ROSTER_SHEET_NAME", default_value = roster_engine::DEFAULT_SHEET_NAME)]
    sheet_name: String,

    /// Service account JSON key
    #[arg(long, env = "ROSTER_CREDENTIALS_PATH")]
    credentials_path: PathBuf,

    /// Discord bot token
    #[arg(long, env = "ROSTER_DISCORD_TOKEN", hide_env_values = true)]
    discord_token: String,

    /// Guild that owns the monitored channels
    #[arg(long, env = "ROSTER_GUILD_ID")]
    guild_id: String,
}

impl From<Cli> for daemon::DaemonConfig {
    fn from(cli: Cli) -> Self {
        Self {
            channel_ids: cli.channel_ids,
            spreadsheet_id: cli.spreadsheet_id,
            sheet_name: cli.sheet_name,
            credentials_path: cli.credentials_path,
            discord_token: cli.discord_token,
            guild_id: cli.guild_id,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "roster=info,roster_engine=info,roster_sheets=info,roster_presence=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    daemon::run(cli.into()).await
}
