//! Voice-state cache for the configured guild.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::{debug, trace};

use roster_engine::{MemberIdentity, MemberRef, PresenceEvent};

use crate::PresenceError;
use crate::types::{GuildCreate, GuildMember, VoiceState};

/// Tracks which voice channel each member is in, plus known identities.
pub struct VoiceStateCache {
    guild_id: String,
    /// user id -> voice channel id
    channels: DashMap<String, String>,
    /// user id -> identity
    members: DashMap<String, MemberIdentity>,
    ready: AtomicBool,
}

impl VoiceStateCache {
    pub fn new(guild_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            guild_id: guild_id.into(),
            channels: DashMap::new(),
            members: DashMap::new(),
            ready: AtomicBool::new(false),
        })
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Whether the guild has been loaded at least once.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Replace all state with a fresh `GUILD_CREATE`.
    ///
    /// Returns `None` if the payload is for another guild or unavailable.
    /// On a reload, returns a change event for every member whose channel
    /// differs from the previous state, ordered by user id.
    pub fn load_guild(&self, guild: GuildCreate) -> Option<Vec<PresenceEvent>> {
        if guild.id != self.guild_id || guild.unavailable {
            return None;
        }

        let was_ready = self.is_ready();
        let previous: BTreeMap<String, String> = self
            .channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        self.channels.clear();
        for member in &guild.members {
            self.remember(member);
        }
        for state in guild.voice_states {
            if let Some(member) = &state.member {
                self.remember(member);
            }
            if let Some(channel) = state.channel_id {
                self.channels.insert(state.user_id, channel);
            }
        }

        self.ready.store(true, Ordering::Release);

        let changes = if was_ready {
            self.diff_channels(previous)
        } else {
            Vec::new()
        };
        debug!(
            guild = %self.guild_id,
            members = self.members.len(),
            in_voice = self.channels.len(),
            changes = changes.len(),
            "loaded guild voice state"
        );
        Some(changes)
    }

    fn diff_channels(&self, previous: BTreeMap<String, String>) -> Vec<PresenceEvent> {
        let current: BTreeMap<String, String> = self
            .channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let users: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
        users
            .into_iter()
            .filter_map(|user_id| {
                let before = previous.get(user_id).cloned();
                let after = current.get(user_id).cloned();
                if before == after {
                    return None;
                }
                Some(PresenceEvent::VoiceStateChanged {
                    previous_channel: before,
                    new_channel: after,
                    member: self.member_ref(user_id),
                })
            })
            .collect()
    }

    fn member_ref(&self, user_id: &str) -> MemberRef {
        match self.member(user_id) {
            Some(identity) => MemberRef::Resolved(identity),
            None => MemberRef::Unresolved {
                user_id: user_id.to_string(),
            },
        }
    }

    /// Record a member's identity. Returns false without user data.
    pub fn remember(&self, member: &GuildMember) -> bool {
        match (member.user_id(), member.identity()) {
            (Some(id), Some(identity)) => {
                self.members.insert(id.to_string(), identity);
                true
            }
            _ => false,
        }
    }

    pub fn member(&self, user_id: &str) -> Option<MemberIdentity> {
        self.members.get(user_id).map(|m| m.value().clone())
    }

    pub fn channel_of(&self, user_id: &str) -> Option<String> {
        self.channels.get(user_id).map(|c| c.value().clone())
    }

    /// Apply a voice state update and produce the change event.
    ///
    /// Returns `None` for other guilds and for updates that do not move
    /// the member (mute, deafen, stream toggles).
    pub fn apply_voice_state(&self, state: VoiceState) -> Option<PresenceEvent> {
        if state.guild_id.as_deref().is_some_and(|g| g != self.guild_id) {
            return None;
        }

        if let Some(member) = &state.member {
            self.remember(member);
        }

        let previous = match &state.channel_id {
            Some(channel) => self.channels.insert(state.user_id.clone(), channel.clone()),
            None => self.channels.remove(&state.user_id).map(|(_, c)| c),
        };

        if previous == state.channel_id {
            trace!(user = %state.user_id, "voice state update without channel change");
            return None;
        }

        Some(PresenceEvent::VoiceStateChanged {
            previous_channel: previous,
            new_channel: state.channel_id,
            member: self.member_ref(&state.user_id),
        })
    }

    /// Members currently in a channel.
    pub fn channel_members(&self, channel_id: &str) -> Result<Vec<MemberIdentity>, PresenceError> {
        if !self.is_ready() {
            return Err(PresenceError::NotReady);
        }

        Ok(self
            .channels
            .iter()
            .filter(|entry| entry.value() == channel_id)
            .map(|entry| {
                self.member(entry.key())
                    .unwrap_or_else(|| MemberIdentity::unresolved(entry.key().clone()))
            })
            .collect())
    }
}
