//! Discord presence source for the voice channel roster.
//!
//! The [`GatewayClient`] keeps a gateway session open and maintains a
//! [`VoiceStateCache`] for one guild. [`DiscordPresence`] answers the
//! engine's [`PresenceSource`] queries from that cache, falling back to the
//! REST API for members the gateway has not told us about.

use std::sync::Arc;

use async_trait::async_trait;

use roster_engine::{MemberIdentity, PresenceSource};

pub mod cache;
mod error;
pub mod gateway;
pub mod rest;
pub mod types;

pub use cache::VoiceStateCache;
pub use error::PresenceError;
pub use gateway::{DEFAULT_GATEWAY_URL, GatewayClient};
pub use rest::{DEFAULT_API_URL, DiscordRest};

/// [`PresenceSource`] backed by the gateway cache and REST lookups.
pub struct DiscordPresence {
    cache: Arc<VoiceStateCache>,
    rest: DiscordRest,
}

impl DiscordPresence {
    pub fn new(cache: Arc<VoiceStateCache>, rest: DiscordRest) -> Self {
        Self { cache, rest }
    }
}

#[async_trait]
impl PresenceSource for DiscordPresence {
    type Error = PresenceError;

    async fn channel_members(&self, channel_id: &str) -> Result<Vec<MemberIdentity>, PresenceError> {
        self.cache.channel_members(channel_id)
    }

    async fn resolve_member(&self, user_id: &str) -> Result<MemberIdentity, PresenceError> {
        if let Some(identity) = self.cache.member(user_id) {
            return Ok(identity);
        }

        let member = self.rest.guild_member(self.cache.guild_id(), user_id).await?;
        self.cache.remember(&member);
        member
            .identity()
            .ok_or_else(|| PresenceError::UnknownMember(user_id.to_string()))
    }
}
