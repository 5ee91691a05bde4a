//! Implementation of `reviewtask update` command.

use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write;

use reviewtask_core::model::TaskStatus;
use reviewtask_core::CoreError;

use crate::cli::commands::helpers::RepoContext;
use crate::output::Formatter;

/// Change a task's status and/or notes.
///
/// The task's pull request comes from `pr_number` or, failing that, from
/// searching every stored task set.
#[tracing::instrument(skip(ctx, notes, format, out))]
pub fn run_update(
    ctx: &RepoContext,
    task_id: &str,
    status: Option<TaskStatus>,
    notes: Option<String>,
    pr_number: Option<u64>,
    format: Formatter,
    out: &mut dyn Write,
) -> Result<()> {
    let store = ctx.store()?;
    let slug = ctx.slug()?;

    let pr = match pr_number {
        Some(number) => slug.pull_request(number),
        None => store
            .find_task_pr(&slug, task_id)?
            .ok_or_else(|| CoreError::TaskNotFound {
                task_id: task_id.to_string(),
            })?,
    };

    let task = store
        .update_task(&pr, task_id, status, notes, Utc::now())
        .with_context(|| format!("Failed to update task in {pr}"))?;

    format.note(out, &format!("Updated {}", task.id))?;
    format.print(out, &task)
}
