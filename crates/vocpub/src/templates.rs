//! Commit message and pull request templating.
//!
//! Placeholders: `{vocabulary}`, `{branch}`, `{date}` (`dd/mm/YYYY`),
//! `{datetime}` (`dd/mm/YYYY HH:MM`) and `{timestamp}` (`YYYYmmddHHMM`).

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Trailer key marking commits written by the pipeline.
pub const TRAILER_KEY: &str = "Vocpub-Vocabulary";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PublishTemplates {
    pub commit_message: String,
    pub pr_title: String,
    pub pr_body: String,
}

impl Default for PublishTemplates {
    fn default() -> Self {
        Self {
            commit_message: "Publish {vocabulary} vocabulary".to_string(),
            pr_title: "Release: {date} - {vocabulary}".to_string(),
            pr_body: "Automated publication of the {vocabulary} vocabulary exported from VocBench."
                .to_string(),
        }
    }
}

/// Values substituted into the templates.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub vocabulary: &'a str,
    pub branch: &'a str,
    pub now: DateTime<Utc>,
}

impl PublishTemplates {
    /// Commit message with the pipeline trailer appended.
    pub fn commit_message(&self, ctx: &TemplateContext<'_>) -> String {
        let subject = render(&self.commit_message, ctx);
        format!(
            "{}\n\n{}",
            subject.trim_end(),
            pipeline_trailer(ctx.vocabulary)
        )
    }

    pub fn pr_title(&self, ctx: &TemplateContext<'_>) -> String {
        render(&self.pr_title, ctx)
    }

    pub fn pr_body(&self, ctx: &TemplateContext<'_>) -> String {
        render(&self.pr_body, ctx)
    }
}

/// Substitute every known placeholder; unknown ones are left as-is.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("{vocabulary}", ctx.vocabulary)
        .replace("{branch}", ctx.branch)
        .replace("{datetime}", &ctx.now.format("%d/%m/%Y %H:%M").to_string())
        .replace("{date}", &ctx.now.format("%d/%m/%Y").to_string())
        .replace("{timestamp}", &ctx.now.format("%Y%m%d%H%M").to_string())
}

pub fn pipeline_trailer(vocabulary_id: &str) -> String {
    format!("{TRAILER_KEY}: {vocabulary_id}")
}

/// Whether a commit message carries the pipeline trailer for this vocabulary.
pub fn has_pipeline_trailer(message: &str, vocabulary_id: &str) -> bool {
    message.lines().any(|line| {
        line.split_once(':').is_some_and(|(key, value)| {
            key.trim().eq_ignore_ascii_case(TRAILER_KEY) && value.trim() == vocabulary_id
        })
    })
}
