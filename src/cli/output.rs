//! Output formatting for CLI commands.
//!
//! This module renders plans, deployment results and snapshots either as
//! colored tables for people or as JSON for scripts.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::deployment::{DeploymentResult, DeploymentStatus, ResourceOutcome};
use crate::planner::{Plan, PlanSummary, ResourceChange, StepKind};
use crate::resource::StackRef;
use crate::state::{LockInfo, Snapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan change row for table display.
#[derive(Tabled)]
struct PlanChangeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Resource outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Snapshot entry row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Flags")]
    flags: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - the stack is up to date.\n",
                "✓".green()
            );
        }

        let rows: Vec<PlanChangeRow> = plan
            .changes
            .iter()
            .filter(|c| c.kind() != StepKind::Same)
            .enumerate()
            .map(|(i, change)| PlanChangeRow {
                index: i + 1,
                action: Self::format_kind(change.kind()),
                type_token: change.urn().type_token().to_string(),
                name: change.urn().name().to_string(),
                details: Self::truncate(&change_details(change), 40),
            })
            .collect();

        let mut output = String::from("\nDeployment plan\n\n");
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        let _ = writeln!(output, "\n{}", Self::format_summary(&plan.summary()));
        output
    }

    /// Formats a deployment result.
    #[must_use]
    pub fn format_result(&self, result: &DeploymentResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => {
                let status = match result.status {
                    DeploymentStatus::Succeeded => format!("{} Deployment succeeded", "✓".green()),
                    DeploymentStatus::Failed => format!("{} Deployment failed", "✗".red()),
                    DeploymentStatus::Cancelled => format!("{} Deployment cancelled", "⚠".yellow()),
                };

                let rows: Vec<OutcomeRow> = result
                    .resources
                    .iter()
                    .filter(|r| r.outcome != ResourceOutcome::Same)
                    .map(|r| OutcomeRow {
                        type_token: r.urn.type_token().to_string(),
                        name: r.urn.name().to_string(),
                        outcome: Self::format_outcome(&r.outcome),
                    })
                    .collect();

                let mut output = format!("{status}\n\n");
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push_str("\n\n");
                }
                let _ = writeln!(output, "{}", Self::format_summary(&result.summary));
                let _ = writeln!(output, "Resources recorded: {}", result.snapshot.resources.len());
                output
            }
        }
    }

    /// Formats the recorded snapshot of a stack.
    #[must_use]
    pub fn format_snapshot(&self, stack: &StackRef, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => to_json(snapshot),
            OutputFormat::Text => {
                let mut output = format!("\nState: {stack}\n\n");
                let _ = writeln!(output, "   Engine version: {}", snapshot.manifest.engine_version);
                let _ = writeln!(output, "   Last updated: {}", snapshot.manifest.time);
                let plugins: Vec<String> = snapshot
                    .manifest
                    .plugins
                    .iter()
                    .map(|p| format!("{}@{}", p.name, p.version))
                    .collect();
                if !plugins.is_empty() {
                    let _ = writeln!(output, "   Plugins: {}", plugins.join(", "));
                }
                let _ = writeln!(output, "   Resources: {}\n", snapshot.resources.len());

                if snapshot.is_empty() {
                    output.push_str("   No resources recorded.\n");
                    return output;
                }

                let rows: Vec<ResourceRow> = snapshot
                    .resources
                    .iter()
                    .map(|r| {
                        let mut flags = Vec::new();
                        if r.protect {
                            flags.push("protected");
                        }
                        if r.retain_on_delete {
                            flags.push("retained");
                        }
                        if r.pending_delete {
                            flags.push("pending-delete");
                        }
                        if r.pending_replacement {
                            flags.push("pending-replacement");
                        }
                        ResourceRow {
                            type_token: r.type_token.clone(),
                            name: r.urn.name().to_string(),
                            id: Self::truncate(r.id.as_deref().unwrap_or("-"), 24),
                            flags: flags.join(" "),
                        }
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats the result of a forced unlock.
    #[must_use]
    pub fn format_unlock(&self, stack: &StackRef, previous: Option<&LockInfo>, removed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "stack": stack.to_string(),
                "removed": removed,
                "lock": previous,
            })),
            OutputFormat::Text => match (removed, previous) {
                (true, Some(lock)) => format!(
                    "{} Removed lock on {stack} held by {} since {}\n",
                    "✓".green(),
                    lock.holder,
                    lock.acquired_at
                ),
                (true, None) => format!("{} Removed lock on {stack}\n", "✓".green()),
                (false, _) => format!("{stack} is not locked.\n"),
            },
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    fn format_summary(summary: &PlanSummary) -> String {
        format!(
            "Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().magenta(),
            summary.delete.to_string().red(),
            summary.same
        )
    }

    /// Formats a change kind with color.
    fn format_kind(kind: StepKind) -> String {
        match kind {
            StepKind::Create | StepKind::CreateReplacement => "+ create".green().to_string(),
            StepKind::Update => "~ update".yellow().to_string(),
            StepKind::Replace => "+- replace".magenta().to_string(),
            StepKind::Delete | StepKind::DeleteReplaced => "- delete".red().to_string(),
            StepKind::Same => "same".dimmed().to_string(),
        }
    }

    fn format_outcome(outcome: &ResourceOutcome) -> String {
        let text = Self::truncate(&outcome.to_string(), 60);
        match outcome {
            ResourceOutcome::Created => text.green().to_string(),
            ResourceOutcome::Updated => text.yellow().to_string(),
            ResourceOutcome::Replaced => text.magenta().to_string(),
            ResourceOutcome::Deleted | ResourceOutcome::Failed { .. } => text.red().to_string(),
            ResourceOutcome::Same | ResourceOutcome::Skipped => text.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn change_details(change: &ResourceChange) -> String {
    match change {
        ResourceChange::Update {
            changed,
            provider_call: false,
            ..
        } if changed.is_empty() => String::from("metadata only"),
        ResourceChange::Update { changed, .. } => changed.join(", "),
        ResourceChange::Replace(replacement) => {
            let keys = replacement.replace_keys.join(", ");
            if replacement.order == crate::planner::ReplaceOrder::DeleteBeforeCreate {
                format!("{keys} (delete first)")
            } else {
                keys
            }
        }
        ResourceChange::Create {
            consumes: Some(_), ..
        } => String::from("recreate"),
        _ => String::new(),
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    created_at: String,
    summary: PlanSummary,
    changes: Vec<ChangeJson>,
}

#[derive(Serialize)]
struct ChangeJson {
    urn: String,
    kind: StepKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    details: String,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            created_at: plan.created_at.to_rfc3339(),
            summary: plan.summary(),
            changes: plan
                .changes
                .iter()
                .map(|c| ChangeJson {
                    urn: c.urn().to_string(),
                    kind: c.kind(),
                    details: change_details(c),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceState;
    use crate::state::Manifest;

    fn state(name: &str) -> ResourceState {
        let urn = StackRef::new("web", "dev")
            .urn(None, "echo:index:Bucket", name)
            .unwrap();
        ResourceState::new(urn, true)
    }

    #[test]
    fn test_plan_json_lists_every_change() {
        let plan = Plan::from_changes(vec![
            ResourceChange::Create {
                new: state("a"),
                consumes: None,
            },
            ResourceChange::Delete {
                old_index: 0,
                old: state("b"),
            },
        ]);

        let json: serde_json::Value =
            serde_json::from_str(&OutputFormatter::new(OutputFormat::Json).format_plan(&plan)).unwrap();

        assert_eq!(json["summary"]["create"], 1);
        assert_eq!(json["summary"]["delete"], 1);
        assert_eq!(json["changes"][0]["kind"], "create");
        assert_eq!(json["changes"][1]["kind"], "delete");
    }

    #[test]
    fn test_text_plan_without_changes() {
        let plan = Plan::from_changes(vec![ResourceChange::Same {
            old_index: 0,
            old: state("a"),
            new: state("a"),
        }]);

        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan);
        assert!(text.contains("No changes required"));
    }

    #[test]
    fn test_snapshot_table_shows_flags() {
        let mut protected = state("db");
        protected.protect = true;
        protected.id = Some(String::from("db-1234"));
        let snapshot = Snapshot::new(Manifest::default(), vec![protected]);

        let text = OutputFormatter::new(OutputFormat::Text)
            .format_snapshot(&StackRef::new("web", "dev"), &snapshot);

        assert!(text.contains("db-1234"));
        assert!(text.contains("protected"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééé", 6), "ééé...");
    }
}
