//! GitHub integration — webhook validation, repository tree and file reads.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::error::{PortalError, PortalResult};

type HmacSha256 = Hmac<Sha256>;

const USER_AGENT: &str = "portal-sync";

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
///
/// An empty secret disables validation: every payload is accepted and the
/// server runs in unauthenticated mode.
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, skipping validation");
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Compute the `X-Hub-Signature-256` header value for `payload`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// A repository pinned to one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCoordinate {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

#[derive(Clone)]
pub enum GithubAuth {
    Anonymous,
    /// Personal access token.
    Token(String),
    /// GitHub App installation; tokens are minted on demand.
    App {
        app_id: String,
        installation_id: String,
        private_key_pem: String,
    },
}

impl fmt::Debug for GithubAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::App {
                app_id,
                installation_id,
                ..
            } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    auth: GithubAuth,
    installation_token: Mutex<Option<CachedToken>>,
}

impl GithubClient {
    pub fn new(api_url: &str, auth: GithubAuth, timeout: Duration) -> PortalResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PortalError::SourceUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            auth,
            installation_token: Mutex::new(None),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> PortalResult<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| PortalError::SourceUnavailable(format!("bad GitHub API url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| PortalError::SourceUnavailable("GitHub API url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments.iter().filter(|s| !s.is_empty()));
        Ok(url)
    }

    /// Value for the `Authorization` header, if any.
    async fn authorization(&self) -> PortalResult<Option<String>> {
        match &self.auth {
            GithubAuth::Anonymous => Ok(None),
            GithubAuth::Token(token) => Ok(Some(format!("Bearer {token}"))),
            GithubAuth::App {
                app_id,
                installation_id,
                private_key_pem,
            } => {
                let token = self
                    .installation_token(app_id, installation_id, private_key_pem)
                    .await?;
                Ok(Some(format!("Bearer {token}")))
            }
        }
    }

    async fn installation_token(
        &self,
        app_id: &str,
        installation_id: &str,
        private_key_pem: &str,
    ) -> PortalResult<String> {
        let mut cached = self.installation_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - chrono::Duration::seconds(60) > Utc::now() {
                return Ok(token.token.clone());
            }
        }

        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 540,
            iss: app_id.to_string(),
        };
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| PortalError::SourceUnavailable(format!("invalid GitHub App key: {e}")))?;
        let jwt = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| PortalError::SourceUnavailable(format!("GitHub App JWT: {e}")))?;

        let url = self.endpoint(&["app", "installations", installation_id, "access_tokens"])?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| PortalError::SourceUnavailable(format!("GitHub App token: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(PortalError::SourceUnavailable(format!(
                "GitHub App token exchange failed: {status} {text}"
            )));
        }

        let token: InstallationToken = resp
            .json()
            .await
            .map_err(|e| PortalError::SourceUnavailable(format!("GitHub App token: {e}")))?;
        tracing::debug!(expires_at = %token.expires_at, "Minted GitHub App installation token");
        let value = token.token.clone();
        *cached = Some(CachedToken {
            token: token.token,
            expires_at: token.expires_at,
        });
        Ok(value)
    }

    async fn get(&self, url: Url, accept: &str) -> PortalResult<reqwest::Response> {
        let mut req = self.http.get(url).header("Accept", accept);
        if let Some(auth) = self.authorization().await? {
            req = req.header("Authorization", auth);
        }
        req.send()
            .await
            .map_err(|e| PortalError::SourceUnavailable(format!("GitHub request failed: {e}")))
    }

    /// List every file under `path` on the pinned branch (recursive).
    pub async fn list_tree(&self, repo: &RepoCoordinate, path: &str) -> PortalResult<Vec<String>> {
        let mut url = self.endpoint(&["repos", &repo.owner, &repo.repo, "git", "trees", &repo.branch])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let resp = self.get(url, "application/vnd.github+json").await?;
        match resp.status() {
            s if s.is_success() => {}
            // Empty repository: nothing to list.
            StatusCode::CONFLICT => return Ok(Vec::new()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PortalError::SourceUnavailable(format!(
                    "GitHub rejected credentials listing {}/{}: {}",
                    repo.owner,
                    repo.repo,
                    resp.status()
                )));
            }
            status => {
                let text = resp.text().await.unwrap_or_default();
                return Err(PortalError::SourceUnavailable(format!(
                    "GitHub tree listing for {}/{}@{} failed: {status} {text}",
                    repo.owner, repo.repo, repo.branch
                )));
            }
        }

        let tree: TreeResponse = resp
            .json()
            .await
            .map_err(|e| PortalError::SourceUnavailable(format!("GitHub tree response: {e}")))?;
        if tree.truncated {
            tracing::warn!(
                owner = %repo.owner,
                repo = %repo.repo,
                "GitHub tree listing was truncated; some catalog files may be missing"
            );
        }

        let prefix = path.trim_matches('/');
        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .filter(|p| prefix.is_empty() || p.starts_with(&format!("{prefix}/")))
            .collect())
    }

    /// Raw file content at the pinned branch.
    pub async fn get_file_content(&self, repo: &RepoCoordinate, path: &str) -> PortalResult<Vec<u8>> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.repo.as_str(), "contents"];
        segments.extend(path.split('/'));
        let mut url = self.endpoint(&segments)?;
        url.query_pairs_mut().append_pair("ref", &repo.branch);

        let resp = self.get(url, "application/vnd.github.raw+json").await?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(PortalError::not_found(
                    "catalog file",
                    format!("{path}@{}", repo.branch),
                ));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PortalError::SourceUnavailable(format!(
                    "GitHub rejected credentials reading {path}: {}",
                    resp.status()
                )));
            }
            status => {
                let text = resp.text().await.unwrap_or_default();
                return Err(PortalError::SourceUnavailable(format!(
                    "GitHub content fetch for {path} failed: {status} {text}"
                )));
            }
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PortalError::SourceUnavailable(format!("GitHub content body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let sig = sign_payload("s3cret", body);
        assert!(sig.starts_with("sha256="));
        assert!(validate_signature("s3cret", body, &sig));
    }

    #[test]
    fn tampered_body_or_wrong_secret_is_rejected() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let sig = sign_payload("s3cret", body);
        assert!(!validate_signature("s3cret", br#"{"ref":"refs/heads/evil"}"#, &sig));
        assert!(!validate_signature("other", body, &sig));
        assert!(!validate_signature("s3cret", body, ""));
        assert!(!validate_signature("s3cret", body, "sha256=zz"));
    }

    #[test]
    fn empty_secret_skips_validation() {
        assert!(validate_signature("", b"anything", ""));
    }

    #[test]
    fn auth_debug_hides_secrets() {
        let out = format!("{:?}", GithubAuth::Token("ghp_secret".into()));
        assert!(!out.contains("ghp_secret"));
        let app = GithubAuth::App {
            app_id: "1".into(),
            installation_id: "2".into(),
            private_key_pem: "PRIVATE".into(),
        };
        assert!(!format!("{app:?}").contains("PRIVATE"));
    }

    #[test]
    fn endpoint_keeps_enterprise_base_path() {
        let client = GithubClient::new(
            "https://ghe.example.com/api/v3/",
            GithubAuth::Anonymous,
            Duration::from_secs(5),
        )
        .unwrap();
        let url = client.endpoint(&["repos", "acme", "catalog"]).unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/repos/acme/catalog");
    }
}
