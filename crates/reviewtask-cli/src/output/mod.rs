//! Output formatting for reviewtask
//!
//! Human-readable text (default) or JSON (`--json`). Everything writes to a
//! caller-supplied writer so commands can be driven from tests.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use reviewtask_core::model::{Task, TaskSet};
use reviewtask_core::pipeline::FetchOutcome;
use reviewtask_core::reconcile::ChangeSummary;

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text for terminals
    #[default]
    Text,
    /// JSON format - machine-readable output
    Json,
}

impl OutputFormat {
    #[must_use]
    pub const fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Text rendering for values that also serialize to JSON.
pub trait RenderText {
    fn render_text(&self, out: &mut dyn Write) -> Result<()>;
}

/// Writes data in the selected format.
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    #[must_use]
    pub fn is_json(self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Write `data` as pretty JSON or as text.
    pub fn print<T: Serialize + RenderText>(self, out: &mut dyn Write, data: &T) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::to_string_pretty(data)?;
                writeln!(out, "{output}")?;
                Ok(())
            }
            OutputFormat::Text => data.render_text(out),
        }
    }

    /// Write a short status line in text mode; JSON mode stays silent so
    /// stdout holds a single document.
    pub fn note(self, out: &mut dyn Write, message: &str) -> Result<()> {
        if !self.is_json() {
            writeln!(out, "{message}")?;
        }
        Ok(())
    }

    /// Write a list of tasks.
    ///
    /// For JSON, wraps the array in an object with a count. For text, prints
    /// `empty_message` when there is nothing to show.
    pub fn print_tasks(self, out: &mut dyn Write, tasks: &[&Task], empty_message: &str) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let envelope = serde_json::json!({
                    "tasks": tasks,
                    "count": tasks.len(),
                });
                writeln!(out, "{}", serde_json::to_string_pretty(&envelope)?)?;
            }
            OutputFormat::Text => {
                if tasks.is_empty() {
                    writeln!(out, "{empty_message}")?;
                } else {
                    for task in tasks {
                        write_task_line(out, task)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// One task per line: id, status, location, description.
pub fn write_task_line(out: &mut dyn Write, task: &Task) -> Result<()> {
    let status = format!("[{}]", task.status);
    let location = task.location().unwrap_or_else(|| "-".to_string());
    writeln!(out, "{}  {status:<13}  {location}", task.id)?;
    writeln!(out, "    {}", task.description)?;
    if let Some(notes) = &task.user_notes {
        writeln!(out, "    notes: {notes}")?;
    }
    Ok(())
}

fn write_summary(out: &mut dyn Write, summary: &ChangeSummary) -> Result<()> {
    if summary.is_empty() {
        writeln!(out, "No changes.")?;
    } else {
        writeln!(
            out,
            "{} added, {} updated, {} cancelled, {} removed",
            summary.added, summary.updated, summary.cancelled, summary.removed
        )?;
    }
    Ok(())
}

fn write_counts(out: &mut dyn Write, set: &TaskSet) -> Result<()> {
    let counts = set
        .status_counts()
        .iter()
        .map(|(status, n)| format!("{n} {status}"))
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(out, "Tasks: {counts}")?;
    Ok(())
}

impl RenderText for FetchOutcome {
    fn render_text(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(
            out,
            "Processed {} comments in {} threads for {}",
            self.comments, self.units, self.pr
        )?;
        write_summary(out, &self.summary)?;
        write_counts(out, &self.set)?;
        Ok(())
    }
}

impl RenderText for Task {
    fn render_text(&self, out: &mut dyn Write) -> Result<()> {
        write_task_line(out, self)
    }
}
