use clap::Parser;
use llmio::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    llmio::cli::run(Cli::parse()).await
}
