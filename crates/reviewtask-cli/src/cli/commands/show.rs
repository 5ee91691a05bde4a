//! Implementation of `reviewtask show` command.

use anyhow::Result;
use std::io::Write;

use reviewtask_core::model::TaskStatus;

use crate::cli::commands::helpers::{stored_pr, RepoContext};
use crate::output::Formatter;

/// List stored tasks, optionally filtered by status. Reads local state only.
#[tracing::instrument(skip(ctx, format, out))]
pub fn run_show(
    ctx: &RepoContext,
    pr_number: Option<u64>,
    status: Option<TaskStatus>,
    format: Formatter,
    out: &mut dyn Write,
) -> Result<()> {
    let store = ctx.store()?;
    let slug = ctx.slug()?;

    let Some(pr) = stored_pr(&store, &slug, pr_number)? else {
        return format.print_tasks(out, &[], "No tasks yet. Run 'reviewtask fetch' first.");
    };
    let Some(set) = store.load(&pr)? else {
        return format.print_tasks(out, &[], &format!("No tasks for {pr}."));
    };

    let tasks: Vec<_> = set
        .tasks
        .iter()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .collect();

    format.note(out, &format!("Tasks for {pr}:"))?;
    format.print_tasks(out, &tasks, "No matching tasks.")
}
