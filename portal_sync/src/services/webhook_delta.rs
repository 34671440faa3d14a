//! Push-event delta detection: which catalog files a push touched.

use std::collections::HashSet;

use serde::Deserialize;

use crate::services::catalog_reader::is_catalog_file;

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

/// Added or modified catalog files, first-seen order, no duplicates.
///
/// Pushes to any ref other than `catalog_ref` yield nothing. Removed files
/// are never returned.
pub fn changed_catalog_files(event: &PushEvent, catalog_ref: &str, root: &str) -> Vec<String> {
    if event.git_ref != catalog_ref {
        return Vec::new();
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut changed: Vec<String> = Vec::new();
    for commit in &event.commits {
        for path in commit.added.iter().chain(commit.modified.iter()) {
            if is_catalog_file(root, path) && seen.insert(path.as_str()) {
                changed.push(path.clone());
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(git_ref: &str, commits: Vec<PushCommit>) -> PushEvent {
        PushEvent {
            git_ref: git_ref.to_string(),
            after: None,
            commits,
        }
    }

    fn commit(added: &[&str], modified: &[&str], removed: &[&str]) -> PushCommit {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        PushCommit {
            id: "abc".into(),
            added: owned(added),
            modified: owned(modified),
            removed: owned(removed),
        }
    }

    #[test]
    fn other_branches_are_ignored() {
        let event = push(
            "refs/heads/feature",
            vec![commit(&["projects/a.yaml"], &[], &[])],
        );
        assert!(changed_catalog_files(&event, "refs/heads/main", "projects").is_empty());
    }

    #[test]
    fn filters_by_root_and_extension() {
        let event = push(
            "refs/heads/main",
            vec![commit(
                &["projects/a.yaml", "README.md", "src/main.rs"],
                &["projects/b.yml", "projects/notes.txt"],
                &[],
            )],
        );
        assert_eq!(
            changed_catalog_files(&event, "refs/heads/main", "projects"),
            vec!["projects/a.yaml", "projects/b.yml"]
        );
    }

    #[test]
    fn union_across_commits_is_deduplicated_in_order() {
        let event = push(
            "refs/heads/main",
            vec![
                commit(&["projects/b.yaml"], &["projects/a.yaml"], &[]),
                commit(&[], &["projects/b.yaml", "projects/c.yaml"], &[]),
            ],
        );
        assert_eq!(
            changed_catalog_files(&event, "refs/heads/main", "projects"),
            vec!["projects/b.yaml", "projects/a.yaml", "projects/c.yaml"]
        );
    }

    #[test]
    fn large_push_keeps_each_path_once() {
        let paths: Vec<String> = (0..2000).map(|i| format!("projects/svc-{i}.yaml")).collect();
        let commits = (0..50)
            .map(|_| PushCommit {
                id: "abc".into(),
                modified: paths.clone(),
                ..Default::default()
            })
            .collect();
        let event = push("refs/heads/main", commits);
        assert_eq!(
            changed_catalog_files(&event, "refs/heads/main", "projects"),
            paths
        );
    }

    #[test]
    fn removed_files_are_not_synced() {
        let event = push(
            "refs/heads/main",
            vec![commit(&[], &[], &["projects/gone.yaml"])],
        );
        assert!(changed_catalog_files(&event, "refs/heads/main", "projects").is_empty());
    }

    #[test]
    fn deserializes_github_payload() {
        let body = r#"{
            "ref": "refs/heads/main",
            "after": "deadbeef",
            "commits": [{"id": "1", "added": ["projects/x.yaml"], "modified": [], "removed": []}],
            "repository": {"full_name": "acme/catalog"}
        }"#;
        let event: PushEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.git_ref, "refs/heads/main");
        assert_eq!(event.commits[0].added, vec!["projects/x.yaml"]);
    }
}
