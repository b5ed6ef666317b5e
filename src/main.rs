use std::process::ExitCode;

use ralph_board::cli;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    match cli::run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ralph: {err:#}");
            ExitCode::FAILURE
        }
    }
}
