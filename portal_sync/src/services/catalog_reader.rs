//! Catalog source — enumerates and reads declaration files at a pinned branch.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PortalError, PortalResult};
use crate::models::declaration::CatalogDeclaration;
use crate::services::github_service::{GithubClient, RepoCoordinate};

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every declaration file under the catalog root. Empty when the root
    /// does not exist.
    async fn list_candidate_files(&self) -> PortalResult<Vec<String>>;

    async fn fetch_and_parse(&self, path: &str) -> PortalResult<CatalogDeclaration>;
}

/// True for `.yaml`/`.yml` files (any case) under `root`.
pub fn is_catalog_file(root: &str, path: &str) -> bool {
    let root = root.trim_matches('/');
    let under_root = root.is_empty()
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'));
    if !under_root {
        return false;
    }
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

pub struct GithubCatalogReader {
    client: Arc<GithubClient>,
    repo: RepoCoordinate,
    root: String,
}

impl GithubCatalogReader {
    pub fn new(client: Arc<GithubClient>, repo: RepoCoordinate, root: &str) -> Self {
        Self {
            client,
            repo,
            root: root.trim_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CatalogSource for GithubCatalogReader {
    async fn list_candidate_files(&self) -> PortalResult<Vec<String>> {
        let mut files: Vec<String> = self
            .client
            .list_tree(&self.repo, &self.root)
            .await?
            .into_iter()
            .filter(|p| is_catalog_file(&self.root, p))
            .collect();
        files.sort();
        tracing::debug!(count = files.len(), root = %self.root, "Listed catalog files");
        Ok(files)
    }

    async fn fetch_and_parse(&self, path: &str) -> PortalResult<CatalogDeclaration> {
        let bytes = self.client.get_file_content(&self.repo, path).await?;
        let content = String::from_utf8(bytes)
            .map_err(|_| PortalError::Parse(format!("{path}: file is not valid UTF-8")))?;
        CatalogDeclaration::parse(path, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_yaml_under_root_only() {
        assert!(is_catalog_file("projects", "projects/payments.yaml"));
        assert!(is_catalog_file("projects", "projects/team/api.YML"));
        assert!(!is_catalog_file("projects", "projects/README.md"));
        assert!(!is_catalog_file("projects", "docs/payments.yaml"));
        assert!(!is_catalog_file("projects", "projects-old/payments.yaml"));
        assert!(!is_catalog_file("projects", "projects.yaml"));
        assert!(is_catalog_file("", "anywhere.yaml"));
    }
}
