//! Repository and organization discovery endpoints

use serde::Deserialize;

use crate::GitHubClient;
use crate::error::Result;

/// A repository visible to the authenticated account
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    /// `owner/name`
    pub full_name: String,

    #[serde(default)]
    pub archived: bool,

    #[serde(default)]
    pub disabled: bool,
}

impl Repository {
    /// Archived and disabled repositories cannot run workflows
    pub fn is_active(&self) -> bool {
        !self.archived && !self.disabled
    }
}

/// An organization the authenticated account belongs to
#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub login: String,
}

impl GitHubClient {
    // =============================================================================
    // Discovery
    // =============================================================================

    /// List repositories of the authenticated user
    ///
    /// `GET /user/repos`
    pub async fn list_user_repositories(&self) -> Result<Vec<Repository>> {
        self.get_paginated("user/repos").await
    }

    /// List organizations of the authenticated user
    ///
    /// `GET /user/orgs`
    pub async fn list_user_organizations(&self) -> Result<Vec<Organization>> {
        self.get_paginated("user/orgs").await
    }

    /// List repositories of an organization
    ///
    /// `GET /orgs/{org}/repos`
    pub async fn list_organization_repositories(&self, org: &str) -> Result<Vec<Repository>> {
        self.get_paginated(&format!("orgs/{}/repos", org)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_defaults() {
        let repo: Repository = serde_json::from_str(r#"{"full_name":"acme/app"}"#).unwrap();
        assert_eq!(repo.full_name, "acme/app");
        assert!(repo.is_active());

        let archived: Repository =
            serde_json::from_str(r#"{"full_name":"acme/old","archived":true}"#).unwrap();
        assert!(!archived.is_active());
    }
}
