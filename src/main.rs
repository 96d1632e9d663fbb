// src/main.rs

use std::process::ExitCode;

use countdag::errors::CountdagError;
use countdag::{cli, logging, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("countdag error: {err:#}");
        return ExitCode::from(2);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("countdag error: {err}");
            ExitCode::from(exit_status(&err))
        }
    }
}

/// 1 when the pipeline ran and a stage failed, 2 when it could not start.
fn exit_status(err: &CountdagError) -> u8 {
    match err {
        CountdagError::RunFailed { .. } | CountdagError::Structural { .. } => 1,
        _ => 2,
    }
}
