use clap::Parser;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    cli::init_logging();
    let args = cli::Args::parse();
    match cli::run(args).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("flowllm: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}
