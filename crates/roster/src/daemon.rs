//! Daemon wiring: presence gateway -> reconciler -> sync writer -> sheet.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use roster_engine::{MembershipStore, Reconciler, RosterSheet, SyncWriter};
use roster_presence::{DiscordPresence, DiscordRest, GatewayClient, VoiceStateCache};
use roster_sheets::{Credentials, ServiceAccountKey, SheetsClient};

/// Buffered presence events between the gateway and the reconciler.
const EVENT_QUEUE_SIZE: usize = 256;

/// Configuration for the daemon.
#[derive(Debug)]
pub struct DaemonConfig {
    pub channel_ids: Vec<String>,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub credentials_path: PathBuf,
    pub discord_token: String,
    pub guild_id: String,
}

impl DaemonConfig {
    /// Reject configurations that cannot work before touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.channel_ids.is_empty() {
            return Err(miette::miette!("no voice channel ids configured"));
        }
        if self.channel_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(miette::miette!(
                "blank voice channel id in {:?}",
                self.channel_ids
            ));
        }

        for (name, value) in [
            ("spreadsheet id", &self.spreadsheet_id),
            ("sheet name", &self.sheet_name),
            ("Discord token", &self.discord_token),
            ("guild id", &self.guild_id),
        ] {
            if value.trim().is_empty() {
                return Err(miette::miette!("{} must not be empty", name));
            }
        }

        Ok(())
    }

    /// Trimmed channel ids.
    pub fn monitored_channels(&self) -> Vec<String> {
        self.channel_ids.iter().map(|id| id.trim().to_string()).collect()
    }
}

/// Run the daemon until a shutdown signal or a fatal gateway error.
pub async fn run(config: DaemonConfig) -> Result<()> {
    config.validate()?;

    let key = ServiceAccountKey::from_file(&config.credentials_path).map_err(|e| {
        miette::miette!(
            "failed to load credentials from {}: {}",
            config.credentials_path.display(),
            e
        )
    })?;
    info!(email = %key.client_email, "loaded service account");

    let sheets = SheetsClient::new(&config.spreadsheet_id, Credentials::ServiceAccount(key))
        .map_err(|e| miette::miette!("failed to create Sheets client: {}", e))?;
    let sheet = Arc::new(RosterSheet::new(sheets, config.sheet_name.clone()));

    let rest = DiscordRest::new(config.discord_token.clone())
        .map_err(|e| miette::miette!("failed to create Discord client: {}", e))?;
    let cache = VoiceStateCache::new(config.guild_id.clone());
    let presence = Arc::new(DiscordPresence::new(Arc::clone(&cache), rest));

    let store = MembershipStore::new();
    let writer = SyncWriter::spawn(Arc::clone(&store), Arc::clone(&sheet));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    // The gateway owns the only event sender, so the reconciler stops when it does.
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
    let gateway = GatewayClient::new(config.discord_token.clone(), cache, event_tx);
    let gateway_shutdown = shutdown_rx.clone();
    let gateway_handle = tokio::spawn(async move { gateway.run(gateway_shutdown).await });

    let reconciler = Reconciler::new(
        presence,
        store,
        sheet,
        writer.clone(),
        config.monitored_channels(),
    );

    info!(
        channels = ?config.monitored_channels(),
        sheet = %config.sheet_name,
        "roster daemon started"
    );
    reconciler.run(event_rx, shutdown_rx).await;

    info!("shutting down roster daemon");

    // Let any queued write land before the worker stops.
    if let Err(e) = writer.flush().await {
        warn!(error = %e, "failed to flush sync writer");
    }
    writer.shutdown();

    gateway_handle
        .await
        .map_err(|e| miette::miette!("gateway task failed: {}", e))?
        .map_err(|e| miette::miette!("gateway stopped: {}", e))?;

    info!("roster daemon shut down gracefully");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }

    tokio::signal::ctrl_c().await.ok();
}
