use clap::ValueEnum;
use serde::Serialize;
use tabled::Tabled;
use tabled::settings::Style;

use vocpub::{RunOutcome, TargetOutcome};

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// One row of the run outcome table.
#[derive(Debug, Clone, Tabled)]
pub(crate) struct OutcomeRow {
    #[tabled(rename = "Vocabulary")]
    pub vocabulary: String,
    #[tabled(rename = "Repository")]
    pub repository: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Details")]
    pub details: String,
}

pub(crate) fn outcome_rows(outcome: &RunOutcome) -> Vec<OutcomeRow> {
    outcome
        .per_target
        .iter()
        .map(|(vocabulary, report)| {
            let (status, details) = match &report.outcome {
                TargetOutcome::Published {
                    pr_number,
                    url,
                    created,
                } => {
                    let status = if *created { "opened" } else { "updated" };
                    (status.to_string(), format!("#{pr_number} {url}"))
                }
                TargetOutcome::NoChange => ("no change".to_string(), String::new()),
                TargetOutcome::Failed { reason, message } => {
                    (format!("failed ({reason})"), message.clone())
                }
            };
            OutcomeRow {
                vocabulary: vocabulary.clone(),
                repository: report.repository.clone().unwrap_or_else(|| "-".to_string()),
                status,
                details,
            }
        })
        .collect()
}

/// Render rows as a rounded table.
pub(crate) fn render_table<T: Tabled>(rows: Vec<T>) -> String {
    let mut table = tabled::Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

/// Print a serializable value in the requested format, using `rows` for tables.
pub(crate) fn print<S: Serialize, T: Tabled>(
    value: &S,
    rows: Vec<T>,
    format: OutputFormat,
) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Table => println!("{}", render_table(rows)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use vocpub::{FailureReason, TargetReport};

    use super::*;

    fn sample() -> RunOutcome {
        let mut per_target = BTreeMap::new();
        per_target.insert(
            "skos".to_string(),
            TargetReport {
                repository: Some("lexicons/skos".to_string()),
                outcome: TargetOutcome::Published {
                    pr_number: 7,
                    url: "https://github.com/lexicons/skos/pull/7".to_string(),
                    created: true,
                },
            },
        );
        per_target.insert(
            "geo".to_string(),
            TargetReport {
                repository: None,
                outcome: TargetOutcome::failed(
                    FailureReason::UnresolvedTarget,
                    "no repository configured for vocabulary 'geo'",
                ),
            },
        );
        RunOutcome { per_target }
    }

    #[test]
    fn rows_are_sorted_by_vocabulary() {
        let rows = outcome_rows(&sample());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].vocabulary, "geo");
        assert_eq!(rows[0].repository, "-");
        assert_eq!(rows[0].status, "failed (unresolved_target)");
        assert_eq!(rows[1].status, "opened");
        assert_eq!(rows[1].details, "#7 https://github.com/lexicons/skos/pull/7");
    }

    #[test]
    fn table_has_headers_and_values() {
        let table = render_table(outcome_rows(&sample()));
        assert!(table.contains("Vocabulary"));
        assert!(table.contains("lexicons/skos"));
        assert!(table.contains("╭"));
    }
}
