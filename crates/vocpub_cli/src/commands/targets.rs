use std::collections::BTreeMap;

use serde::Serialize;
use tabled::Tabled;

use vocpub::{ResolveError, TargetRepository};

use crate::commands::output::{self, OutputFormat};
use crate::commands::shared::build_publisher;
use crate::config::Config;

/// How one vocabulary resolves, for display.
#[derive(Debug, Clone, Serialize, Tabled)]
pub(crate) struct TargetDisplay {
    #[tabled(rename = "Vocabulary")]
    pub vocabulary: String,
    #[tabled(rename = "Repository")]
    pub repository: String,
    #[tabled(rename = "Default Branch")]
    pub default_branch: String,
    #[tabled(rename = "Path")]
    pub path_prefix: String,
    #[tabled(rename = "Publish Branch")]
    pub branch: String,
    #[tabled(rename = "Error")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

pub(crate) fn target_rows(
    resolved: &BTreeMap<String, Result<TargetRepository, ResolveError>>,
    branch_prefix: &str,
) -> Vec<TargetDisplay> {
    resolved
        .iter()
        .map(|(vocabulary, result)| match result {
            Ok(target) => TargetDisplay {
                vocabulary: vocabulary.clone(),
                repository: target.full_name(),
                default_branch: target.default_branch.clone(),
                path_prefix: if target.path_prefix.is_empty() {
                    "/".to_string()
                } else {
                    target.path_prefix.clone()
                },
                branch: vocpub::publish::publish_branch_name(branch_prefix, vocabulary),
                error: String::new(),
            },
            Err(e) => TargetDisplay {
                vocabulary: vocabulary.clone(),
                repository: "-".to_string(),
                default_branch: "-".to_string(),
                path_prefix: "-".to_string(),
                branch: "-".to_string(),
                error: e.to_string(),
            },
        })
        .collect()
}

pub(crate) async fn handle_targets(
    vocabularies: Vec<String>,
    output_format: OutputFormat,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let publisher = build_publisher(config, None)?;
    let resolved = publisher.resolve(&vocabularies).await?;
    let rows = target_rows(&resolved, &config.publish.branch_prefix);
    output::print(&rows, rows.clone(), output_format)?;
    Ok(())
}
