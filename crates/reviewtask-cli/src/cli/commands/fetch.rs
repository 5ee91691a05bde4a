//! Implementation of `reviewtask fetch` command.

use anyhow::Result;
use chrono::Utc;
use std::io::Write;

use reviewtask_core::config::Config;
use reviewtask_core::pipeline::{resolve_pr, FetchPipeline};

use crate::cli::commands::helpers::RepoContext;
use crate::cli::SourceProvider;
use crate::output::Formatter;

/// Fetch reviews for one pull request and reconcile its tasks.
///
/// Without `pr_number`, the pull request is looked up from the current
/// branch. Nothing touches the network until the repository is known to be
/// initialized.
#[tracing::instrument(skip(ctx, provider, format, out))]
pub fn run_fetch(
    ctx: &RepoContext,
    provider: &dyn SourceProvider,
    pr_number: Option<u64>,
    format: Formatter,
    out: &mut dyn Write,
) -> Result<()> {
    let store = ctx.store()?;
    let config = Config::load(ctx.root())?;
    let slug = ctx.slug()?;

    let source = provider.source(&config)?;
    let pr = resolve_pr(source.as_ref(), &slug, pr_number, || ctx.git().current_branch())?;

    format.note(out, &format!("Fetching reviews for PR {pr}..."))?;
    let outcome = FetchPipeline::new(source.as_ref(), &store, &config).run(&pr, Utc::now())?;
    format.print(out, &outcome)
}
