use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use vocpub::{PublishProgress, TargetOutcome};

/// Interactive progress reporter: one spinner line per vocabulary.
pub struct InteractiveReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn done_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("  {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    pub fn handle(&self, event: PublishProgress) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            PublishProgress::TargetStarted {
                vocabulary,
                repository,
            } => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::spinner_style());
                bar.enable_steady_tick(Duration::from_millis(100));
                bar.set_prefix(vocabulary.clone());
                bar.set_message(format!("→ {repository}"));
                bars.insert(vocabulary, bar);
            }

            PublishProgress::StateChanged { vocabulary, state } => {
                if let Some(bar) = bars.get(&vocabulary) {
                    bar.set_message(state.to_string());
                }
            }

            PublishProgress::Committed {
                vocabulary,
                commit_sha,
                files_changed,
                ..
            } => {
                if let Some(bar) = bars.get(&vocabulary) {
                    let short = commit_sha.get(..7).unwrap_or(&commit_sha);
                    bar.set_message(format!("committed {short} ({files_changed} files)"));
                }
            }

            PublishProgress::ConflictRetry { vocabulary, .. } => {
                if let Some(bar) = bars.get(&vocabulary) {
                    bar.set_message("branch moved, retrying");
                }
            }

            PublishProgress::TargetFinished {
                vocabulary,
                outcome,
            } => {
                let message = match &outcome {
                    TargetOutcome::Published { url, created, .. } => {
                        let verb = if *created { "opened" } else { "updated" };
                        console::style(format!("✓ {verb} {url}")).green().to_string()
                    }
                    TargetOutcome::NoChange => console::style("✓ no change").dim().to_string(),
                    TargetOutcome::Failed { reason, message } => {
                        console::style(format!("✗ {reason}: {message}")).red().to_string()
                    }
                };
                let bar = match bars.remove(&vocabulary) {
                    Some(bar) => bar,
                    None => {
                        // Failed before starting (unresolved, cancelled).
                        let bar = self.multi.add(ProgressBar::new_spinner());
                        bar.set_prefix(vocabulary);
                        bar
                    }
                };
                bar.set_style(Self::done_style());
                bar.finish_with_message(message);
            }

            PublishProgress::Warning { message } => {
                let _ = self.multi.println(format!("warning: {message}"));
            }

            _ => {}
        }
    }

    /// Stop spinners still running (a cancelled or aborted run).
    pub fn finish(&self) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for (_, bar) in bars.drain() {
            bar.abandon();
        }
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
