//! Presence-source seam and the events it delivers.

use async_trait::async_trait;

use crate::identity::MemberIdentity;

/// Source of channel membership.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current members of a channel.
    async fn channel_members(&self, channel_id: &str) -> Result<Vec<MemberIdentity>, Self::Error>;

    /// Look up a member's identity by raw id.
    async fn resolve_member(&self, user_id: &str) -> Result<MemberIdentity, Self::Error>;
}

/// A member as carried by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRef {
    /// The event carried full identity data.
    Resolved(MemberIdentity),
    /// Only the raw id is known.
    Unresolved { user_id: String },
}

/// Events consumed by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The presence session is established and channel state is loaded.
    Ready,
    /// A member's channel changed. `None` means "not in any channel".
    VoiceStateChanged {
        previous_channel: Option<String>,
        new_channel: Option<String>,
        member: MemberRef,
    },
}
