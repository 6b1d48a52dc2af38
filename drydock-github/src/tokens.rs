//! Runner registration token endpoints

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::GitHubClient;
use crate::error::Result;

/// Short-lived token a self-hosted runner uses to register itself
///
/// The token value is only reachable through [`RegistrationToken::secret`]; it is
/// never printed by `Debug`.
#[derive(Clone, Deserialize)]
pub struct RegistrationToken {
    token: String,

    /// When the platform will stop accepting the token
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RegistrationToken {
    /// Builds a token from a raw value (tests and alternative sources)
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// The raw token value
    pub fn secret(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl GitHubClient {
    // =============================================================================
    // Registration Tokens
    // =============================================================================

    /// Create a registration token for a repository-scoped runner
    ///
    /// `POST /repos/{owner}/{repo}/actions/runners/registration-token`
    pub async fn create_repo_registration_token(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<RegistrationToken> {
        let url = self.url(&format!(
            "repos/{}/{}/actions/runners/registration-token",
            owner, repo
        ));
        let response = self.authorized(self.client.post(&url)).send().await?;

        self.handle_response(response).await
    }

    /// Create a registration token for an organization-scoped runner
    ///
    /// `POST /orgs/{org}/actions/runners/registration-token`
    pub async fn create_org_registration_token(&self, org: &str) -> Result<RegistrationToken> {
        let url = self.url(&format!("orgs/{}/actions/runners/registration-token", org));
        let response = self.authorized(self.client.post(&url)).send().await?;

        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_deserializes_and_redacts() {
        let token: RegistrationToken = serde_json::from_str(
            r#"{"token":"LLBF3JGZDX3P5PMEXLND6TS6FCWO6","expires_at":"2020-01-22T12:13:35.123-08:00"}"#,
        )
        .unwrap();

        assert_eq!(token.secret(), "LLBF3JGZDX3P5PMEXLND6TS6FCWO6");
        assert!(token.expires_at.is_some());

        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("LLBF3JGZDX3P5PMEXLND6TS6FCWO6"));
    }
}
