//! reviewtask - turn GitHub pull request reviews into local tasks

mod cli;
mod logging;
mod output;

use std::env;
use std::io::{self, Write};
use std::process::ExitCode;

use cli::{GitHubProvider, Router};

fn main() -> ExitCode {
    let workdir = match env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: cannot read current directory: {e}");
            return ExitCode::from(1);
        }
    };

    let router = Router::new(Box::new(GitHubProvider), workdir).with_logging();
    let mut stdout = io::stdout().lock();
    let result = router.run(env::args_os(), &mut stdout);
    stdout.flush().ok();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
