use std::path::{Path, PathBuf};
use std::sync::Arc;

use vocpub::export::DEFAULT_EXTENSION;
use vocpub::{RunControl, VocabularyExport};

use crate::commands::output::{self, OutputFormat};
use crate::commands::shared::build_publisher;
use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::shutdown::setup_shutdown_handler;

/// Options for the publish command.
#[derive(Debug, Clone)]
pub(crate) struct PublishArgs {
    pub vocabularies: Vec<String>,
    pub source: PathBuf,
    pub output: OutputFormat,
    pub concurrency: Option<usize>,
    pub deadline_secs: Option<u64>,
}

/// Locate the file drop for one vocabulary.
///
/// A single vocabulary takes `source` as is. Several vocabularies expect
/// `source` to be a directory holding `<id>/` or `<id>.rdf` per vocabulary.
pub(crate) fn locate_export(source: &Path, vocabulary: &str, single: bool) -> Result<PathBuf, String> {
    if single {
        if source.exists() {
            return Ok(source.to_path_buf());
        }
        return Err(format!("Source '{}' does not exist", source.display()));
    }

    if !source.is_dir() {
        return Err(format!(
            "Source '{}' must be a directory when publishing several vocabularies",
            source.display()
        ));
    }

    let candidates = [
        source.join(vocabulary),
        source.join(format!("{vocabulary}.{DEFAULT_EXTENSION}")),
    ];
    candidates
        .into_iter()
        .find(|path| path.exists())
        .ok_or_else(|| {
            format!(
                "No export for '{vocabulary}' in '{}' (expected '{vocabulary}/' or '{vocabulary}.{DEFAULT_EXTENSION}')",
                source.display()
            )
        })
}

/// Load every export before touching GitHub.
pub(crate) fn load_exports(
    vocabularies: &[String],
    source: &Path,
) -> Result<Vec<VocabularyExport>, Box<dyn std::error::Error>> {
    let single = vocabularies.len() == 1;
    let mut exports = Vec::with_capacity(vocabularies.len());
    for vocabulary in vocabularies {
        let path = locate_export(source, vocabulary, single)?;
        tracing::debug!(vocabulary = %vocabulary, path = %path.display(), "Loading export");
        exports.push(VocabularyExport::from_path(vocabulary.clone(), &path)?);
    }
    Ok(exports)
}

pub(crate) async fn handle_publish(
    args: PublishArgs,
    mut config: Config,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(concurrency) = args.concurrency {
        config.publish.concurrency = concurrency;
    }
    if let Some(deadline) = args.deadline_secs {
        config.publish.deadline_secs = Some(deadline);
    }

    let exports = load_exports(&args.vocabularies, &args.source)?;

    let reporter = Arc::new(ProgressReporter::new());
    let publisher = build_publisher(&config, Some(Arc::clone(&reporter)))?;

    let mut control = RunControl::new();
    if let Some(deadline) = config.publish.deadline() {
        control = control.with_deadline(deadline);
    }
    setup_shutdown_handler(control.clone());

    let started = std::time::Instant::now();
    let result = publisher.run(exports, &control).await;
    reporter.finish();
    let outcome = result?;

    output::print(&outcome, output::outcome_rows(&outcome), args.output)?;

    let counts = outcome.counts();
    tracing::info!(
        published = counts.published,
        unchanged = counts.unchanged,
        failed = counts.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Run finished"
    );

    if counts.failed > 0 && config.publish.fail_on_target_error {
        return Err(format!("{} of {} target(s) failed", counts.failed, outcome.len()).into());
    }
    Ok(())
}
