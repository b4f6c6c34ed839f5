//! Event reconciler.
//!
//! Applies presence events to the membership store in arrival order and
//! asks the sync writer to mirror the result. Each event's mutation is
//! complete before the next event is looked at.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::identity::{MemberIdentity, MemberLabel};
use crate::membership::MembershipStore;
use crate::presence::{MemberRef, PresenceEvent, PresenceSource};
use crate::sheet::{RosterSheet, SheetTransport};
use crate::writer::SyncHandle;

/// Store mutations caused by one membership event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub removed: Option<MemberLabel>,
    pub added: Option<MemberLabel>,
}

impl MembershipChange {
    pub fn is_empty(&self) -> bool {
        self.removed.is_none() && self.added.is_none()
    }
}

/// Consumes presence events and keeps the membership store current.
pub struct Reconciler<P, T> {
    presence: Arc<P>,
    store: Arc<MembershipStore>,
    sheet: Arc<RosterSheet<T>>,
    writer: SyncHandle,
    monitored: HashSet<String>,
    snapshot_done: bool,
}

impl<P, T> Reconciler<P, T>
where
    P: PresenceSource,
    T: SheetTransport,
{
    pub fn new(
        presence: Arc<P>,
        store: Arc<MembershipStore>,
        sheet: Arc<RosterSheet<T>>,
        writer: SyncHandle,
        monitored: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            presence,
            store,
            sheet,
            writer,
            monitored: monitored.into_iter().collect(),
            snapshot_done: false,
        }
    }

    pub fn is_monitored(&self, channel_id: &str) -> bool {
        self.monitored.contains(channel_id)
    }

    /// Rebuild the membership from every monitored channel and force a sync.
    ///
    /// A channel that cannot be fetched contributes no members; the sync
    /// still goes ahead. Returns the number of tracked labels.
    #[tracing::instrument(skip(self))]
    pub async fn snapshot_sync(&mut self) -> usize {
        if let Err(e) = self.sheet.ensure_header().await {
            warn!(error = %e, "failed to ensure roster header");
        }

        let mut labels = Vec::new();
        let mut channels: Vec<&String> = self.monitored.iter().collect();
        channels.sort();

        for channel_id in channels {
            match self.presence.channel_members(channel_id).await {
                Ok(members) => {
                    debug!(channel = %channel_id, count = members.len(), "fetched channel members");
                    labels.extend(members.iter().map(MemberIdentity::label));
                }
                Err(e) => {
                    warn!(channel = %channel_id, error = %e, "failed to fetch channel, skipping");
                }
            }
        }

        self.store.replace_all(labels);
        self.snapshot_done = true;
        let tracked = self.store.len();
        info!(tracked, "snapshot sync complete");

        self.writer.request_sync();
        tracked
    }

    /// Apply one channel change for a member.
    ///
    /// Leaving a monitored channel removes the label; joining one adds it.
    /// For a move between two monitored channels the removal runs first so
    /// the member stays tracked.
    pub async fn member_event(
        &self,
        previous_channel: Option<&str>,
        new_channel: Option<&str>,
        member: &MemberRef,
    ) -> MembershipChange {
        let leaving = previous_channel.is_some_and(|c| self.is_monitored(c))
            && previous_channel != new_channel;
        let joining =
            new_channel.is_some_and(|c| self.is_monitored(c)) && new_channel != previous_channel;

        let mut change = MembershipChange::default();
        if !leaving && !joining {
            return change;
        }

        let label = self.resolve(member).await;

        if leaving {
            self.store.remove(&label);
            debug!(label = %label, channel = ?previous_channel, "member left");
            self.writer.request_sync();
            change.removed = Some(label.clone());
        }

        if joining {
            self.store.add(label.clone());
            debug!(label = %label, channel = ?new_channel, "member joined");
            self.writer.request_sync();
            change.added = Some(label);
        }

        change
    }

    /// Handle one presence event.
    pub async fn handle_event(&mut self, event: PresenceEvent) {
        match event {
            PresenceEvent::Ready => {
                if self.snapshot_done {
                    debug!("presence session ready again, snapshot already taken");
                } else {
                    self.snapshot_sync().await;
                }
            }
            PresenceEvent::VoiceStateChanged {
                previous_channel,
                new_channel,
                member,
            } => {
                self.member_event(previous_channel.as_deref(), new_channel.as_deref(), &member)
                    .await;
            }
        }
    }

    /// Consume events until the channel closes or shutdown is signalled.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<PresenceEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(channels = self.monitored.len(), "reconciler starting");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("reconciler received shutdown signal");
                        break;
                    }
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            info!("presence event stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Best-effort label for an event's member.
    async fn resolve(&self, member: &MemberRef) -> MemberLabel {
        match member {
            MemberRef::Resolved(identity) => identity.label(),
            MemberRef::Unresolved { user_id } => {
                match self.presence.resolve_member(user_id).await {
                    Ok(identity) => identity.label(),
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "could not resolve member, using raw id");
                        MemberIdentity::unresolved(user_id.clone()).label()
                    }
                }
            }
        }
    }
}
