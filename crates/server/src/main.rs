use clap::Parser as _;
use jules_mcp_server::cli::Cli;
use jules_mcp_server::{logging, run};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.log_level, cli.log_format) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "jules-mcp stopped");
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
