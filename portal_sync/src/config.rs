//! Portal sync configuration — loaded from environment variables.

use uuid::Uuid;

use crate::services::github_service::{GithubAuth, RepoCoordinate};

#[derive(Clone, Debug)]
pub struct PortalConfig {
    /// GitHub REST API base URL (override for GitHub Enterprise).
    pub github_api_url: String,
    /// Owner (user or org) of the catalog repository.
    pub catalog_owner: String,
    /// Name of the catalog repository.
    pub catalog_repo: String,
    /// Branch the catalog is read from and webhooks are filtered on.
    pub catalog_branch: String,
    /// Directory inside the repository holding declaration files.
    pub catalog_root: String,
    /// Personal access token for GitHub API calls.
    pub github_token: String,
    /// GitHub App id, used instead of the token when set with a key and installation.
    pub github_app_id: Option<String>,
    pub github_app_installation_id: Option<String>,
    /// PEM-encoded RSA private key of the GitHub App.
    pub github_app_private_key: Option<String>,
    /// GitHub webhook secret for HMAC validation.
    pub webhook_secret: String,
    /// Team assigned to projects created by webhook-triggered syncs.
    pub webhook_team_id: Option<Uuid>,
    /// Base64-encoded 32-byte key for the credential vault.
    pub vault_key: String,
    /// Timeout in seconds for every outbound GitHub/AWS call.
    pub http_timeout_secs: u64,
    /// Upper bound on provisioning jobs running at once.
    pub max_concurrent_provisions: usize,
    /// Endpoint override for AWS APIs (e.g. LocalStack).
    pub aws_endpoint_url: Option<String>,
    /// Database connection pool size.
    pub max_db_connections: usize,
}

impl PortalConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let github_api_url = var("PORTAL_GITHUB_API_URL")
            .unwrap_or_else(|| "https://api.github.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let catalog_owner = var("PORTAL_CATALOG_OWNER").unwrap_or_default();
        let catalog_repo = var("PORTAL_CATALOG_REPO").unwrap_or_default();
        let catalog_branch = var("PORTAL_CATALOG_BRANCH").unwrap_or_else(|| "main".to_string());
        let catalog_root = var("PORTAL_CATALOG_ROOT")
            .unwrap_or_else(|| "projects".to_string())
            .trim_matches('/')
            .to_string();
        let github_token = var("PORTAL_GITHUB_TOKEN").unwrap_or_default();
        let github_app_id = var("PORTAL_GITHUB_APP_ID");
        let github_app_installation_id = var("PORTAL_GITHUB_APP_INSTALLATION_ID");
        let github_app_private_key = var("PORTAL_GITHUB_APP_PRIVATE_KEY");
        let webhook_secret = var("PORTAL_WEBHOOK_SECRET").unwrap_or_default();
        let webhook_team_id = var("PORTAL_WEBHOOK_TEAM_ID").and_then(|s| match s.parse() {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("PORTAL_WEBHOOK_TEAM_ID is not a UUID ({e}) -- ignoring");
                None
            }
        });
        let vault_key = var("PORTAL_VAULT_KEY").unwrap_or_default();
        let http_timeout_secs = var("PORTAL_HTTP_TIMEOUT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let max_concurrent_provisions = var("PORTAL_MAX_CONCURRENT_PROVISIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);
        let aws_endpoint_url = var("PORTAL_AWS_ENDPOINT_URL");
        let max_db_connections = var("PORTAL_DB_MAX_CONNECTIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        if webhook_secret.is_empty() {
            tracing::warn!("PORTAL_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if github_token.is_empty() && github_app_id.is_none() {
            tracing::warn!("Neither PORTAL_GITHUB_TOKEN nor a GitHub App is configured -- catalog reads are anonymous");
        }
        if catalog_owner.is_empty() || catalog_repo.is_empty() {
            tracing::warn!("PORTAL_CATALOG_OWNER/PORTAL_CATALOG_REPO not set -- catalog sync will fail");
        }
        if vault_key.is_empty() {
            tracing::warn!("PORTAL_VAULT_KEY not set -- stored credentials cannot be decrypted");
        }

        Self {
            github_api_url,
            catalog_owner,
            catalog_repo,
            catalog_branch,
            catalog_root,
            github_token,
            github_app_id,
            github_app_installation_id,
            github_app_private_key,
            webhook_secret,
            webhook_team_id,
            vault_key,
            http_timeout_secs,
            max_concurrent_provisions: max_concurrent_provisions.max(1),
            aws_endpoint_url,
            max_db_connections,
        }
    }

    pub fn catalog_coordinate(&self) -> RepoCoordinate {
        RepoCoordinate {
            owner: self.catalog_owner.clone(),
            repo: self.catalog_repo.clone(),
            branch: self.catalog_branch.clone(),
        }
    }

    /// GitHub App credentials win over the personal token when all three are set.
    pub fn github_auth(&self) -> GithubAuth {
        match (
            &self.github_app_id,
            &self.github_app_installation_id,
            &self.github_app_private_key,
        ) {
            (Some(app_id), Some(installation_id), Some(private_key)) => GithubAuth::App {
                app_id: app_id.clone(),
                installation_id: installation_id.clone(),
                private_key_pem: private_key.replace("\\n", "\n"),
            },
            _ if !self.github_token.is_empty() => GithubAuth::Token(self.github_token.clone()),
            _ => GithubAuth::Anonymous,
        }
    }

    /// Fully-qualified ref pushes must carry to be considered.
    pub fn catalog_ref(&self) -> String {
        if self.catalog_branch.starts_with("refs/") {
            self.catalog_branch.clone()
        } else {
            format!("refs/heads/{}", self.catalog_branch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> PortalConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PortalConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg.catalog_branch, "main");
        assert_eq!(cfg.catalog_root, "projects");
        assert_eq!(cfg.github_api_url, "https://api.github.com");
        assert_eq!(cfg.max_concurrent_provisions, 4);
        assert!(matches!(cfg.github_auth(), GithubAuth::Anonymous));
        assert_eq!(cfg.catalog_ref(), "refs/heads/main");
    }

    #[test]
    fn app_credentials_take_precedence_over_token() {
        let cfg = config(&[
            ("PORTAL_GITHUB_TOKEN", "ghp_x"),
            ("PORTAL_GITHUB_APP_ID", "42"),
            ("PORTAL_GITHUB_APP_INSTALLATION_ID", "7"),
            ("PORTAL_GITHUB_APP_PRIVATE_KEY", "-----BEGIN KEY-----\\nabc"),
        ]);
        match cfg.github_auth() {
            GithubAuth::App {
                app_id,
                private_key_pem,
                ..
            } => {
                assert_eq!(app_id, "42");
                assert!(private_key_pem.contains('\n'));
            }
            other => panic!("expected app auth, got {other:?}"),
        }
    }

    #[test]
    fn root_slashes_are_trimmed_and_bad_team_id_is_ignored() {
        let cfg = config(&[
            ("PORTAL_CATALOG_ROOT", "/catalog/"),
            ("PORTAL_WEBHOOK_TEAM_ID", "not-a-uuid"),
            ("PORTAL_CATALOG_BRANCH", "refs/heads/release"),
        ]);
        assert_eq!(cfg.catalog_root, "catalog");
        assert!(cfg.webhook_team_id.is_none());
        assert_eq!(cfg.catalog_ref(), "refs/heads/release");
    }
}
