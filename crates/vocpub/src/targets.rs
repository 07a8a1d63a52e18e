//! Mapping vocabularies to the repositories they publish into.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::github::{GitHubApi, GitHubError, RepositoryInfo};

const PLACEHOLDER: &str = "{vocabulary}";

/// Where a vocabulary lands: a repository plus a directory inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetRepository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    /// Empty (repository root) or a `/`-terminated directory.
    pub path_prefix: String,
}

impl TargetRepository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for TargetRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// How vocabulary ids map onto repositories.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TargetConvention {
    /// Organization or user owning the lexicon repositories.
    pub owner: String,
    /// Repository name pattern with a `{vocabulary}` placeholder.
    pub repository_template: String,
    /// Directory pattern inside the repository with a `{vocabulary}` placeholder.
    ///
    /// Blobs under the prefix that an export lacks are deleted. An empty
    /// prefix hands the whole repository to the vocabulary.
    pub path_prefix: String,
    /// Explicit vocabulary → repository name entries, consulted first.
    pub overrides: BTreeMap<String, String>,
    /// Only vocabularies listed in `overrides` resolve.
    pub strict: bool,
}

impl Default for TargetConvention {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repository_template: PLACEHOLDER.to_string(),
            path_prefix: PLACEHOLDER.to_string(),
            overrides: BTreeMap::new(),
            strict: false,
        }
    }
}

impl TargetConvention {
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    /// Repository name for a vocabulary, if the convention covers it.
    pub fn repository_name(&self, vocabulary_id: &str) -> Option<String> {
        if let Some(name) = self.overrides.get(vocabulary_id) {
            return Some(name.clone());
        }
        if self.strict {
            return None;
        }
        Some(self.repository_template.replace(PLACEHOLDER, vocabulary_id))
    }

    /// Normalized path prefix for a vocabulary.
    pub fn path_prefix(&self, vocabulary_id: &str) -> String {
        normalize_prefix(&self.path_prefix.replace(PLACEHOLDER, vocabulary_id))
    }
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid vocabulary id '{0}'")]
    InvalidVocabularyId(String),

    #[error("no repository configured for vocabulary '{0}'")]
    NotMapped(String),

    #[error("installation is not authorized for repository '{0}'")]
    NotAuthorized(String),
}

/// Vocabulary ids become branch names and paths, so they are kept to a safe alphabet.
pub fn validate_vocabulary_id(id: &str) -> Result<(), ResolveError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains("..")
        && !id.ends_with(".lock")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(ResolveError::InvalidVocabularyId(id.to_string()))
    }
}

/// Resolves vocabularies against the installation's repositories.
///
/// The authorized repository list is fetched once, at construction.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    convention: TargetConvention,
    /// Keyed by lowercase `owner/name`; GitHub names are case-insensitive.
    authorized: HashMap<String, RepositoryInfo>,
}

impl TargetResolver {
    pub async fn load(api: &dyn GitHubApi, convention: TargetConvention) -> Result<Self, GitHubError> {
        let repositories = api.list_installation_repositories().await?;
        tracing::info!(
            owner = %convention.owner,
            authorized = repositories.len(),
            "Loaded installation repositories"
        );
        Ok(Self::from_repositories(convention, repositories))
    }

    pub fn from_repositories(
        convention: TargetConvention,
        repositories: impl IntoIterator<Item = RepositoryInfo>,
    ) -> Self {
        let authorized = repositories
            .into_iter()
            .map(|r| (r.full_name().to_ascii_lowercase(), r))
            .collect();
        Self {
            convention,
            authorized,
        }
    }

    pub fn resolve(&self, vocabulary_id: &str) -> Result<TargetRepository, ResolveError> {
        validate_vocabulary_id(vocabulary_id)?;

        let name = self
            .convention
            .repository_name(vocabulary_id)
            .ok_or_else(|| ResolveError::NotMapped(vocabulary_id.to_string()))?;
        let full_name = format!("{}/{}", self.convention.owner, name);

        let repo = self
            .authorized
            .get(&full_name.to_ascii_lowercase())
            .ok_or(ResolveError::NotAuthorized(full_name))?;

        Ok(TargetRepository {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            default_branch: repo.default_branch.clone(),
            path_prefix: self.convention.path_prefix(vocabulary_id),
        })
    }

    /// Resolve several vocabularies at once, keyed by id.
    pub fn resolve_targets<'a>(
        &self,
        vocabulary_ids: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, Result<TargetRepository, ResolveError>> {
        vocabulary_ids
            .into_iter()
            .map(|id| (id.to_string(), self.resolve(id)))
            .collect()
    }

    pub fn convention(&self) -> &TargetConvention {
        &self.convention
    }
}
