//! Discord REST lookups.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::PresenceError;
use crate::types::GuildMember;

/// Default Discord API host.
pub const DEFAULT_API_URL: &str = "https://discord.com";

/// Minimal REST client for guild member lookups.
#[derive(Clone)]
pub struct DiscordRest {
    http: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl DiscordRest {
    pub fn new(token: impl Into<String>) -> Result<Self, PresenceError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch a guild member by user id.
    #[tracing::instrument(skip(self))]
    pub async fn guild_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<GuildMember, PresenceError> {
        let url = format!(
            "{}/api/v10/guilds/{}/members/{}",
            self.base_url.trim_end_matches('/'),
            guild_id,
            user_id
        );

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PresenceError::UnknownMember(user_id.to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            return Err(PresenceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let member: GuildMember = response.json().await?;
        debug!(user = %user_id, "fetched guild member");
        Ok(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rest(server: &MockServer) -> DiscordRest {
        DiscordRest::new("bot-token")
            .unwrap()
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_guild_member_lookup() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v10/guilds/g1/members/u1"))
            .and(header("Authorization", "Bot bot-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nick": null,
                "roles": [],
                "joined_at": "2024-01-01T00:00:00+00:00",
                "user": {
                    "id": "u1",
                    "username": "alice",
                    "discriminator": "0",
                    "global_name": "Alice A."
                }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let member = rest(&mock_server).guild_member("g1", "u1").await.unwrap();
        assert_eq!(member.user_id(), Some("u1"));
        assert_eq!(member.identity().unwrap().label().as_str(), "Alice A.");
    }

    #[tokio::test]
    async fn test_unknown_member() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "message": "Unknown Member",
                "code": 10007
            })))
            .mount(&mock_server)
            .await;

        let err = rest(&mock_server).guild_member("g1", "u9").await.unwrap_err();
        assert!(matches!(err, PresenceError::UnknownMember(ref id) if id == "u9"));
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "message": "Missing Access",
                "code": 50001
            })))
            .mount(&mock_server)
            .await;

        let err = rest(&mock_server).guild_member("g1", "u1").await.unwrap_err();
        match err {
            PresenceError::Api { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Missing Access");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
