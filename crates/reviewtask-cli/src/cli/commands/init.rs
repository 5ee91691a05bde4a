//! Implementation of `reviewtask init` command.

use anyhow::Result;
use std::io::Write;

use reviewtask_core::config::{config_path, data_dir, init_repo};

use crate::cli::commands::helpers::RepoContext;
use crate::output::Formatter;

/// Create `.pr-review/` with a default config. Safe to run twice.
#[tracing::instrument(skip(ctx, format, out), fields(root = %ctx.root().display()))]
pub fn run_init(ctx: &RepoContext, format: Formatter, out: &mut dyn Write) -> Result<()> {
    let created = init_repo(ctx.root())?;
    let dir = data_dir(ctx.root());

    if format.is_json() {
        let output = serde_json::json!({
            "initialized": true,
            "created": created,
            "path": dir.display().to_string(),
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
    } else if created {
        writeln!(out, "Initialized reviewtask in {}", dir.display())?;
        writeln!(out, "  Created: {}", config_path(ctx.root()).display())?;
    } else {
        writeln!(out, "Already initialized: {}", dir.display())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tempfile::TempDir;

    #[test]
    fn test_init_twice() {
        let temp = TempDir::new().unwrap();
        let ctx = RepoContext::discover(temp.path(), None);
        let fmt = Formatter::new(OutputFormat::Text);

        let mut out = Vec::new();
        run_init(&ctx, fmt, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("Initialized reviewtask"));
        assert!(config_path(temp.path()).is_file());

        let mut out = Vec::new();
        run_init(&ctx, fmt, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("Already initialized"));
    }
}
