//! Catalog declarations parsed from YAML files in the catalog repository.
//!
//! A declaration is an intermediate parse result: it is built fresh on every
//! sync pass and discarded once the reconciler has converged the project.
//!
//! ```yaml
//! kind: service
//! name: payments-service
//! description: Card payments API
//! owner: team-fintech
//! links:
//!   - label: Runbook
//!     url: https://wiki.example.com/payments
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PortalError, PortalResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationKind {
    #[default]
    Service,
    Project,
}

impl DeclarationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeclarationKind {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "service" => Ok(Self::Service),
            "project" => Ok(Self::Project),
            other => Err(PortalError::Parse(format!(
                "unsupported kind '{other}' (expected 'service' or 'project')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogLink {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogDeclaration {
    pub kind: DeclarationKind,
    pub name: String,
    pub description: String,
    /// Human-readable owner; resolved to a team id by the reconciler.
    pub owner_team: Option<String>,
    pub links: Vec<CatalogLink>,
    pub source_path: String,
    /// Whole document as JSON, stored on the project for display and diffing.
    pub raw_metadata: serde_json::Value,
}

#[derive(Deserialize)]
struct RawDeclaration {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "owner_team")]
    owner: Option<String>,
    #[serde(default)]
    links: Vec<RawLink>,
}

#[derive(Deserialize)]
struct RawLink {
    #[serde(default, alias = "title")]
    label: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl CatalogDeclaration {
    /// Parse one catalog file. Every failure is a [`PortalError::Parse`].
    pub fn parse(source_path: &str, content: &str) -> PortalResult<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| PortalError::Parse(format!("{source_path}: invalid YAML: {e}")))?;

        if !document.is_mapping() {
            return Err(PortalError::Parse(format!(
                "{source_path}: expected a mapping at the document root"
            )));
        }

        let raw_metadata = serde_json::to_value(&document)
            .map_err(|e| PortalError::Parse(format!("{source_path}: {e}")))?;

        let raw: RawDeclaration = serde_yaml::from_value(document)
            .map_err(|e| PortalError::Parse(format!("{source_path}: {e}")))?;

        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                PortalError::Parse(format!("{source_path}: missing required field 'name'"))
            })?;

        let kind = match raw.kind {
            Some(k) => k
                .parse()
                .map_err(|e| PortalError::Parse(format!("{source_path}: {e}")))?,
            None => DeclarationKind::default(),
        };

        let mut links = Vec::with_capacity(raw.links.len());
        for (idx, link) in raw.links.into_iter().enumerate() {
            let url = link
                .url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    PortalError::Parse(format!("{source_path}: links[{idx}] is missing 'url'"))
                })?;
            let label = link
                .label
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| url.clone());
            links.push(CatalogLink { label, url });
        }

        Ok(Self {
            kind,
            name,
            description: raw.description.unwrap_or_default().trim().to_string(),
            owner_team: raw
                .owner
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty()),
            links,
            source_path: source_path.to_string(),
            raw_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_declaration() {
        let yaml = r#"
kind: service
name: payments-service
description: Card payments API
owner: team-fintech
links:
  - label: Runbook
    url: https://wiki.example.com/payments
  - title: Dashboard
    url: https://grafana.example.com/d/payments
"#;
        let decl = CatalogDeclaration::parse("projects/payments.yaml", yaml).unwrap();
        assert_eq!(decl.kind, DeclarationKind::Service);
        assert_eq!(decl.name, "payments-service");
        assert_eq!(decl.owner_team.as_deref(), Some("team-fintech"));
        assert_eq!(decl.links.len(), 2);
        assert_eq!(decl.links[1].label, "Dashboard");
        assert_eq!(decl.raw_metadata["owner"], "team-fintech");
        assert_eq!(decl.source_path, "projects/payments.yaml");
    }

    #[test]
    fn kind_defaults_to_service_and_owner_team_alias_works() {
        let decl =
            CatalogDeclaration::parse("p.yml", "name: api\nowner_team: platform\n").unwrap();
        assert_eq!(decl.kind, DeclarationKind::Service);
        assert_eq!(decl.owner_team.as_deref(), Some("platform"));
        assert!(decl.description.is_empty());
    }

    #[test]
    fn missing_or_blank_name_is_a_parse_error() {
        for yaml in ["description: nothing\n", "name: '   '\n"] {
            let err = CatalogDeclaration::parse("p.yaml", yaml).unwrap_err();
            assert!(matches!(err, PortalError::Parse(ref m) if m.contains("'name'")));
        }
    }

    #[test]
    fn rejects_unknown_kind_and_non_mapping_documents() {
        assert!(matches!(
            CatalogDeclaration::parse("p.yaml", "kind: database\nname: x\n"),
            Err(PortalError::Parse(_))
        ));
        assert!(matches!(
            CatalogDeclaration::parse("p.yaml", "- a\n- b\n"),
            Err(PortalError::Parse(_))
        ));
        assert!(matches!(
            CatalogDeclaration::parse("p.yaml", "name: [unclosed\n"),
            Err(PortalError::Parse(_))
        ));
    }

    #[test]
    fn link_without_url_is_rejected() {
        let err = CatalogDeclaration::parse("p.yaml", "name: x\nlinks:\n  - label: Docs\n")
            .unwrap_err();
        assert!(err.to_string().contains("links[0]"));
    }
}
