//! Discord gateway and REST payloads.

use serde::{Deserialize, Serialize};

use roster_engine::MemberIdentity;

// =============================================================================
// Opcodes and intents
// =============================================================================

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

pub const INTENT_GUILDS: u64 = 1 << 0;
pub const INTENT_GUILD_MEMBERS: u64 = 1 << 1;
pub const INTENT_GUILD_VOICE_STATES: u64 = 1 << 7;

/// Intents requested at identify.
pub const INTENTS: u64 = INTENT_GUILDS | INTENT_GUILD_MEMBERS | INTENT_GUILD_VOICE_STATES;

/// Envelope of every gateway message.
#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: serde_json::Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

/// Outgoing gateway message.
#[derive(Debug, Serialize)]
pub struct OutgoingPayload<T: Serialize> {
    pub op: u8,
    pub d: T,
}

#[derive(Debug, Serialize)]
pub struct Identify<'a> {
    pub token: &'a str,
    pub intents: u64,
    pub properties: ConnectionProperties<'a>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionProperties<'a> {
    pub os: &'a str,
    pub browser: &'a str,
    pub device: &'a str,
}

// =============================================================================
// Guild data
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl User {
    /// Username with `#discriminator` for legacy accounts.
    pub fn handle(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMember {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub nick: Option<String>,
}

impl GuildMember {
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Name shown in the guild: nickname, else the account-wide display name.
    pub fn guild_display_name(&self) -> Option<&str> {
        let global = self.user.as_ref().and_then(|u| u.global_name.as_deref());
        self.nick
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(global)
    }

    /// Map to the engine's identity record. `None` without user data.
    pub fn identity(&self) -> Option<MemberIdentity> {
        let user = self.user.as_ref()?;
        let mut identity = MemberIdentity::new(user.handle());
        if let Some(name) = self.guild_display_name() {
            identity = identity.with_display_name(name);
        }
        if let Some(nick) = &self.nick {
            identity = identity.with_nickname(nick.clone());
        }
        Some(identity)
    }
}

/// `GUILD_MEMBER_UPDATE` carries the member fields plus the guild id.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberUpdate {
    pub guild_id: String,
    #[serde(flatten)]
    pub member: GuildMember,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub member: Option<GuildMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildCreate {
    pub id: String,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub members: Vec<GuildMember>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_hello() {
        let payload: GatewayPayload = serde_json::from_str(
            r#"{"op":10,"d":{"heartbeat_interval":41250,"_trace":["gw"]},"s":null,"t":null}"#,
        )
        .unwrap();
        assert_eq!(payload.op, OP_HELLO);
        let hello: Hello = serde_json::from_value(payload.d).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn test_parse_heartbeat_ack_without_data() {
        let payload: GatewayPayload = serde_json::from_str(r#"{"op":11}"#).unwrap();
        assert_eq!(payload.op, OP_HEARTBEAT_ACK);
        assert!(payload.d.is_null());
        assert!(payload.t.is_none());
    }

    #[test]
    fn test_identify_serialization() {
        let identify = OutgoingPayload {
            op: OP_IDENTIFY,
            d: Identify {
                token: "abc",
                intents: INTENTS,
                properties: ConnectionProperties {
                    os: "linux",
                    browser: "roster",
                    device: "roster",
                },
            },
        };
        let value = serde_json::to_value(&identify).unwrap();
        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["intents"], 131);
        assert_eq!(value["d"]["properties"]["browser"], "roster");
    }

    #[test]
    fn test_parse_voice_state_update() {
        let state: VoiceState = serde_json::from_str(
            r#"{
                "guild_id": "g1",
                "channel_id": "c1",
                "user_id": "u1",
                "session_id": "s",
                "deaf": false,
                "mute": false,
                "member": {
                    "nick": "Ally",
                    "roles": [],
                    "user": {"id": "u1", "username": "alice", "discriminator": "0", "global_name": null}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(state.channel_id.as_deref(), Some("c1"));
        let identity = state.member.unwrap().identity().unwrap();
        assert_eq!(identity.label().as_str(), "Ally");
    }

    #[test]
    fn test_identity_mapping_priority() {
        let member = GuildMember {
            user: Some(User {
                id: "1".into(),
                username: "bob".into(),
                discriminator: Some("0".into()),
                global_name: Some("Bobby".into()),
            }),
            nick: Some("Bob the Builder".into()),
        };
        assert_eq!(
            member.identity().unwrap().label().as_str(),
            "Bob the Builder"
        );

        let member = GuildMember {
            nick: None,
            ..member
        };
        assert_eq!(member.identity().unwrap().label().as_str(), "Bobby");

        let member = GuildMember {
            nick: Some(String::new()),
            ..member
        };
        assert_eq!(member.identity().unwrap().label().as_str(), "Bobby");

        let member = GuildMember {
            nick: None,
            user: member.user.map(|u| User {
                global_name: None,
                ..u
            }),
        };
        assert_eq!(member.identity().unwrap().label().as_str(), "bob");
    }

    #[test]
    fn test_legacy_discriminator_is_stripped_by_resolver() {
        let user = User {
            id: "1".into(),
            username: "carol".into(),
            discriminator: Some("1234".into()),
            global_name: None,
        };
        assert_eq!(user.handle(), "carol#1234");

        let member = GuildMember {
            user: Some(user),
            nick: None,
        };
        assert_eq!(member.identity().unwrap().label().as_str(), "carol");
    }

    #[test]
    fn test_member_without_user_has_no_identity() {
        let member = GuildMember {
            user: None,
            nick: Some("ghost".into()),
        };
        assert!(member.identity().is_none());
    }

    #[test]
    fn test_parse_guild_member_update() {
        let update: GuildMemberUpdate = serde_json::from_str(
            r#"{"guild_id":"g1","nick":"New","roles":[],"user":{"id":"u1","username":"alice"}}"#,
        )
        .unwrap();
        assert_eq!(update.guild_id, "g1");
        assert_eq!(update.member.user_id(), Some("u1"));
        assert_eq!(update.member.nick.as_deref(), Some("New"));
    }
}
