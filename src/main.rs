use std::io;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;

use email_cli::app;
use email_cli::cli::{self, Cli};
use email_cli::config::Config;
use email_cli::errors::{exit_codes, RunError, SmtpError};
use email_cli::input;
use email_cli::observability;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(exit_codes::USAGE);
        }
    };

    observability::init_tracing(cli.debug);

    if cli.version {
        println!("{}", cli::version_line());
        return ExitCode::SUCCESS;
    }
    tracing::debug!("Running with debug turned on");

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn execute(cli: Cli) -> Result<(), RunError> {
    let config = Config::resolve(cli.into_overrides())?;

    let piped = input::read_piped_body().map_err(RunError::Stdin)?;
    let body = input::select_body(piped, &config.email.message);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            RunError::Transport(
                SmtpError::configuration("Could not start the async runtime").with_cause(e),
            )
        })?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    runtime.block_on(app::run(&config, body, &mut out))?;
    Ok(())
}
