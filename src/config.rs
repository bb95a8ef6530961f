//! # Configuration Schema and Parsing
//!
//! This module defines the YAML document describing what to synchronize:
//! a list of template (source) repositories and a list of target
//! repositories, each target naming the templates it inherits from.
//!
//! ```yaml
//! templates:
//!   - name: base
//!     url: https://git.example.com/acme/template-base.git
//!   - name: rust
//!     url: https://git.example.com/acme/template-rust.git
//!     branch: stable
//!     priority: 10
//!
//! repositories:
//!   - name: Service
//!     url: https://git.example.com/acme/svc.git
//!     branch: main
//!     autoMerge: true
//!     templates: [base, rust]
//!     labels: [sync]
//! ```
//!
//! Field names are camelCase. Templates default to the `main` branch and
//! repositories to `master`. [`Context::plans`] turns the document into one
//! [`SyncPlan`] per repository, with owner and repository names extracted
//! from the URLs.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::owner_and_repository;
use crate::repo_sync::{SourceRepository, TargetRepository};
use crate::syncer::SyncOutput;

fn default_template_branch() -> String {
    "main".to_string()
}

fn default_repository_branch() -> String {
    "master".to_string()
}

/// A template repository files are taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    pub url: String,
    #[serde(default = "default_template_branch")]
    pub branch: String,
    /// Higher wins when templates provide the same path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// A repository receiving template files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default = "default_repository_branch")]
    pub branch: String,
    /// Merge the pull request right after opening it.
    #[serde(default)]
    pub auto_merge: bool,
    /// Names of the templates, in increasing order of precedence.
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Repository {
    pub fn output(&self) -> SyncOutput {
        if self.auto_merge {
            SyncOutput::MergePullRequest
        } else {
            SyncOutput::CreatePullRequest
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

/// One target with the sources it inherits from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    /// Display name of the repository entry.
    pub name: String,
    pub target: TargetRepository,
    pub sources: Vec<SourceRepository>,
}

impl Context {
    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Checks template names are unique and every reference resolves.
    pub fn validate(&self) -> Result<()> {
        for (index, template) in self.templates.iter().enumerate() {
            if self.templates[..index].iter().any(|t| t.name == template.name) {
                return Err(Error::ConfigParse {
                    message: format!("Template '{}' is declared more than once", template.name),
                    hint: Some("Template names must be unique".to_string()),
                });
            }
        }

        for repository in &self.repositories {
            for name in &repository.templates {
                if self.template(name).is_none() {
                    let known: Vec<&str> = self.templates.iter().map(|t| t.name.as_str()).collect();
                    return Err(Error::ConfigParse {
                        message: format!("Repository '{}' references unknown template '{}'", repository.name, name),
                        hint: Some(if known.is_empty() {
                            "Declare it under 'templates:'".to_string()
                        } else {
                            format!("Known templates: {}", known.join(", "))
                        }),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolves every repository into a [`SyncPlan`], in document order.
    pub fn plans(&self) -> Result<Vec<SyncPlan>> {
        self.repositories
            .iter()
            .map(|repository| {
                let (owner, name) = owner_and_repository(&repository.url)?;
                let target = TargetRepository::new(&owner, &name, &repository.branch)
                    .with_labels(repository.labels.clone())
                    .with_output(repository.output());

                let sources = repository
                    .templates
                    .iter()
                    .map(|template_name| {
                        let template = self.template(template_name).ok_or_else(|| Error::ConfigParse {
                            message: format!("Unknown template '{}'", template_name),
                            hint: None,
                        })?;
                        let (owner, name) = owner_and_repository(&template.url)?;
                        let mut source = SourceRepository::new(&owner, &name, &template.branch);
                        source.priority = template.priority;
                        Ok(source)
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(SyncPlan {
                    name: repository.to_string(),
                    target,
                    sources,
                })
            })
            .collect()
    }
}

/// Parses a YAML configuration document.
pub fn parse(yaml_content: &str) -> Result<Context> {
    let context: Context = serde_yaml::from_str(yaml_content).map_err(|e| Error::ConfigParse {
        message: e.to_string(),
        hint: Some("Expected top-level 'templates' and 'repositories' lists".to_string()),
    })?;
    context.validate()?;
    Ok(context)
}

/// Reads and parses the configuration file at `path`.
pub fn from_file(path: &Path) -> Result<Context> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigParse {
        message: format!("Cannot read '{}': {}", path.display(), e),
        hint: None,
    })?;
    parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
templates:
  - name: base
    url: https://git.example.com/acme/template-base.git
  - name: rust
    url: https://git.example.com/acme/template-rust
    branch: stable
    priority: 10
repositories:
  - name: Service
    url: https://git.example.com/acme/svc.git
    branch: main
    autoMerge: true
    templates: [base, rust]
    labels: [sync]
  - name: Web
    url: git@git.example.com:acme/web.git
    templates: [base]
"#;

    #[test]
    fn test_parse_applies_defaults() {
        let context = parse(CONFIG).unwrap();
        assert_eq!(context.templates.len(), 2);
        assert_eq!(context.templates[0].branch, "main");
        assert_eq!(context.templates[0].priority, None);
        assert_eq!(context.templates[1].priority, Some(10));

        let web = &context.repositories[1];
        assert_eq!(web.branch, "master");
        assert!(!web.auto_merge);
        assert!(web.labels.is_empty());
        assert_eq!(web.output(), SyncOutput::CreatePullRequest);
        assert_eq!(context.repositories[0].output(), SyncOutput::MergePullRequest);
    }

    #[test]
    fn test_plans_resolve_owner_and_repository() {
        let plans = parse(CONFIG).unwrap().plans().unwrap();
        assert_eq!(plans.len(), 2);

        let svc = &plans[0];
        assert_eq!(svc.name, "Service (https://git.example.com/acme/svc.git)");
        assert_eq!(svc.target.owner, "acme");
        assert_eq!(svc.target.repository, "svc");
        assert_eq!(svc.target.branch, "main");
        assert_eq!(svc.target.labels, vec!["sync".to_string()]);
        assert_eq!(svc.target.output, Some(SyncOutput::MergePullRequest));
        assert_eq!(svc.sources.len(), 2);
        assert_eq!(svc.sources[0].repository, "template-base");
        assert_eq!(svc.sources[1].repository, "template-rust");
        assert_eq!(svc.sources[1].branch, "stable");
        assert_eq!(svc.sources[1].priority, Some(10));

        assert_eq!(plans[1].target.repository, "web");
    }

    #[test]
    fn test_unknown_template_is_reported_with_hint() {
        let yaml = r#"
templates:
  - name: base
    url: https://git.example.com/acme/base.git
repositories:
  - name: Service
    url: https://git.example.com/acme/svc.git
    templates: [missing]
"#;
        match parse(yaml) {
            Err(Error::ConfigParse { message, hint }) => {
                assert!(message.contains("missing"));
                assert_eq!(hint.as_deref(), Some("Known templates: base"));
            }
            other => panic!("expected ConfigParse, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_template_names_are_rejected() {
        let yaml = r#"
templates:
  - name: base
    url: https://git.example.com/acme/a.git
  - name: base
    url: https://git.example.com/acme/b.git
"#;
        assert!(matches!(parse(yaml), Err(Error::ConfigParse { .. })));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(parse("templates: 3"), Err(Error::ConfigParse { .. })));
        assert_eq!(parse("templates: []").unwrap(), Context::default());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("repo-sync.yaml");
        fs::write(&path, CONFIG).unwrap();
        assert_eq!(from_file(&path).unwrap().repositories.len(), 2);
        assert!(matches!(
            from_file(&dir.path().join("missing.yaml")),
            Err(Error::ConfigParse { .. })
        ));
    }
}
