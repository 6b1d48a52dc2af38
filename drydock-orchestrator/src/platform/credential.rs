//! Runner registration credential

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const FINGERPRINT_LEN: usize = 16;

/// A short-lived registration credential
///
/// The raw value is only reachable through [`Credential::secret`]. `Debug` and
/// `Display` print the fingerprint instead.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// The raw credential, for handing to the runner container only
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// First 16 hex characters of the SHA-256 of the credential
    pub fn fingerprint(&self) -> String {
        let digest = format!("{:x}", Sha256::digest(self.secret.as_bytes()));
        digest[..FINGERPRINT_LEN].to_string()
    }
}

impl From<drydock_github::RegistrationToken> for Credential {
    fn from(token: drydock_github::RegistrationToken) -> Self {
        Credential::new(token.secret(), token.expires_at)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "credential:{}", self.fingerprint())
    }
}
