//! Streamer Login
//!
//! Builds the `ADMIN/LOGIN` request from principal metadata.
//!
//! # Credential
//!
//! The login carries a form-encoded credential string assembled from the
//! streamer info and the selected account:
//!
//! ```text
//! userid=1001&token=...&company=AMER&segment=ADVNCED&cddomain=...&usergroup=ACCT
//!     &accesslevel=ACCT&authorized=Y&timestamp=1572542676000&appid=app1&acl=AKBP
//! ```

use std::fmt;

use super::messages::{QosLevel, RequestSource, StreamRequest};
use crate::application::ports::{PrincipalError, StreamerPrincipal};

/// Form-encoded login credential.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredential {
    encoded: String,
}

impl LoginCredential {
    /// Assemble the credential for `account_id` (or the first account).
    ///
    /// # Errors
    ///
    /// Returns [`PrincipalError::Malformed`] when the account is missing or
    /// the token timestamp cannot be parsed.
    pub fn from_principal(
        principal: &StreamerPrincipal,
        account_id: Option<&str>,
    ) -> Result<Self, PrincipalError> {
        let account = principal.account(account_id)?;
        let info = &principal.streamer_info;
        let timestamp = principal.token_timestamp_millis()?.to_string();

        let pairs = [
            ("userid", account.account_id.as_str()),
            ("token", info.token.as_str()),
            ("company", account.company.as_str()),
            ("segment", account.segment.as_str()),
            ("cddomain", account.account_cd_domain_id.as_str()),
            ("usergroup", info.user_group.as_str()),
            ("accesslevel", info.access_level.as_str()),
            ("authorized", "Y"),
            ("timestamp", timestamp.as_str()),
            ("appid", info.app_id.as_str()),
            ("acl", info.acl.as_str()),
        ];
        let encoded = pairs
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(Self { encoded })
    }

    /// The encoded form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Debug for LoginCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredential")
            .field("encoded", &"<redacted>")
            .finish()
    }
}

/// Everything needed to log in on a fresh connection.
#[derive(Debug, Clone)]
pub struct LoginPlan {
    /// Account and application stamped on every request of this connection.
    pub origin: RequestSource,
    /// WebSocket URI to connect to.
    pub uri: String,
    /// The login request itself.
    pub request: StreamRequest,
}

impl LoginPlan {
    /// Derive the login for a principal.
    ///
    /// # Errors
    ///
    /// Propagates [`LoginCredential::from_principal`] failures.
    pub fn new(
        principal: &StreamerPrincipal,
        account_id: Option<&str>,
        qos: QosLevel,
    ) -> Result<Self, PrincipalError> {
        let credential = LoginCredential::from_principal(principal, account_id)?;
        let account = principal.account(account_id)?;
        let origin = RequestSource {
            account: account.account_id.clone(),
            source: principal.streamer_info.app_id.clone(),
        };
        let request = StreamRequest::login(
            &origin,
            credential.as_str().to_string(),
            principal.streamer_info.token.clone(),
            qos,
        );
        Ok(Self {
            origin,
            uri: principal.socket_uri(),
            request,
        })
    }
}
