//! Streamer principal metadata.
//!
//! Mirrors the JSON returned by the user-principals endpoint when
//! `streamerSubscriptionKeys` and `streamerConnectionInfo` are requested.

use chrono::DateTime;
use serde::Deserialize;

use super::PrincipalError;

/// Options passed to the principal provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRequest {
    /// Optional principal sections to include.
    pub fields: Vec<String>,
}

impl Default for PrincipalRequest {
    fn default() -> Self {
        Self {
            fields: vec![
                "streamerSubscriptionKeys".to_string(),
                "streamerConnectionInfo".to_string(),
            ],
        }
    }
}

/// Principal metadata needed to open a streaming session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamerPrincipal {
    /// Login user id.
    pub user_id: String,
    /// Streamer connection info.
    pub streamer_info: StreamerInfo,
    /// Accounts visible to the user.
    #[serde(default)]
    pub accounts: Vec<PrincipalAccount>,
    /// Subscription keys for account activity.
    #[serde(default)]
    pub streamer_subscription_keys: SubscriptionKeys,
}

/// Streamer connection info.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamerInfo {
    /// Host of the streaming socket, without scheme.
    pub streamer_socket_url: String,
    /// Streamer token.
    pub token: String,
    /// Token issue time, ISO-8601.
    pub token_timestamp: String,
    /// User group.
    pub user_group: String,
    /// Access level.
    pub access_level: String,
    /// Access control list.
    pub acl: String,
    /// Application id.
    pub app_id: String,
}

impl std::fmt::Debug for StreamerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamerInfo")
            .field("streamer_socket_url", &self.streamer_socket_url)
            .field("token", &"[REDACTED]")
            .field("token_timestamp", &self.token_timestamp)
            .field("user_group", &self.user_group)
            .field("access_level", &self.access_level)
            .field("acl", &self.acl)
            .field("app_id", &self.app_id)
            .finish()
    }
}

/// One account of the principal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalAccount {
    /// Account id.
    pub account_id: String,
    /// Company code.
    pub company: String,
    /// Segment code.
    pub segment: String,
    /// CD domain id.
    pub account_cd_domain_id: String,
}

/// Streamer subscription keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionKeys {
    /// Keys, first one is used for account activity.
    #[serde(default)]
    pub keys: Vec<SubscriptionKey>,
}

/// One subscription key.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionKey {
    /// Opaque key value.
    pub key: String,
}

impl StreamerPrincipal {
    /// Select an account by id, or the first account when `id` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`PrincipalError::Malformed`] when no matching account exists.
    pub fn account(&self, id: Option<&str>) -> Result<&PrincipalAccount, PrincipalError> {
        let found = match id {
            Some(id) => self.accounts.iter().find(|a| a.account_id == id),
            None => self.accounts.first(),
        };
        found.ok_or_else(|| {
            PrincipalError::Malformed(format!(
                "account {} not present in principal",
                id.unwrap_or("<first>")
            ))
        })
    }

    /// The first streamer subscription key.
    #[must_use]
    pub fn subscription_key(&self) -> Option<&str> {
        self.streamer_subscription_keys
            .keys
            .first()
            .map(|k| k.key.as_str())
    }

    /// WebSocket URI of the streamer.
    #[must_use]
    pub fn socket_uri(&self) -> String {
        format!("wss://{}/ws", self.streamer_info.streamer_socket_url)
    }

    /// Token timestamp as epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`PrincipalError::Malformed`] when the timestamp is not ISO-8601.
    pub fn token_timestamp_millis(&self) -> Result<i64, PrincipalError> {
        let raw = self.streamer_info.token_timestamp.trim();
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
            .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
            .map(|ts| ts.timestamp_millis())
            .map_err(|e| PrincipalError::Malformed(format!("token timestamp {raw:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRINCIPAL: &str = r#"{
        "userId": "user1",
        "streamerInfo": {
            "streamerSocketUrl": "streamer-ws.example.com",
            "token": "secret-token",
            "tokenTimestamp": "2019-10-31T17:24:36+0000",
            "userGroup": "ACCT",
            "accessLevel": "ACCT",
            "acl": "AKBP",
            "appId": "app1"
        },
        "streamerSubscriptionKeys": {"keys": [{"key": "sub-key-1"}, {"key": "sub-key-2"}]},
        "accounts": [
            {"accountId": "1001", "company": "AMER", "segment": "ADVNCED", "accountCdDomainId": "A000000031539"},
            {"accountId": "1002", "company": "AMER", "segment": "ADVNCED", "accountCdDomainId": "A000000031540"}
        ]
    }"#;

    fn principal() -> StreamerPrincipal {
        serde_json::from_str(PRINCIPAL).unwrap()
    }

    #[test]
    fn parses_principal_json() {
        let p = principal();
        assert_eq!(p.user_id, "user1");
        assert_eq!(p.subscription_key(), Some("sub-key-1"));
        assert_eq!(p.socket_uri(), "wss://streamer-ws.example.com/ws");
    }

    #[test]
    fn selects_accounts() {
        let p = principal();
        assert_eq!(p.account(None).unwrap().account_id, "1001");
        assert_eq!(p.account(Some("1002")).unwrap().account_id, "1002");
        assert!(matches!(
            p.account(Some("9999")),
            Err(PrincipalError::Malformed(_))
        ));
    }

    #[test]
    fn token_timestamp_without_colon_offset() {
        assert_eq!(p_ts("2019-10-31T17:24:36+0000"), Ok(1_572_542_676_000));
        assert_eq!(p_ts("2019-10-31T17:24:36+00:00"), Ok(1_572_542_676_000));
        assert!(p_ts("yesterday").is_err());
    }

    fn p_ts(raw: &str) -> Result<i64, PrincipalError> {
        let mut p = principal();
        p.streamer_info.token_timestamp = raw.to_string();
        p.token_timestamp_millis()
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", principal().streamer_info);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("secret-token"));
    }
}
