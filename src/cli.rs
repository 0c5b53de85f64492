//! Command-line interface.

use crate::config::Config;
use crate::download::{self, DownloadReport, HubClient};
use crate::error::{Error, Result};
use crate::provider::{
    BlockingClient, ChatRequest, Client, Message, Params, Provider, StreamEnd, StreamSummary,
    TextCompletionRequest,
};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Log filter, e.g. `LLMIO_LOG=llmio=trace`.
pub const LOG_ENV: &str = "LLMIO_LOG";

/// Stream ended without `[DONE]`, or some downloads failed.
const EXIT_INCOMPLETE: u8 = 2;
/// Interrupted by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 3;

/// Talk to LLM providers and download models
#[derive(Parser, Debug)]
#[command(name = "llmio", version, about)]
pub struct Cli {
    /// Log to stderr (filter with LLMIO_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a chat prompt and print the reply
    Chat(ChatArgs),
    /// Legacy text completion
    Complete(CompleteArgs),
    /// List model ids
    Models(ModelsArgs),
    /// Show OpenRouter generation stats
    Generation(GenerationArgs),
    /// Download a model repository
    Download(DownloadArgs),
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    /// Provider: openai, anthropic, openrouter, local
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model id
    #[arg(short, long)]
    pub model: Option<String>,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Prompt text (use "-" for stdin)
    pub prompt: String,

    #[command(flatten)]
    pub target: ProviderArgs,

    /// System prompt
    #[arg(long)]
    pub system: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Stream on a blocking thread instead of the async client
    #[arg(long, conflicts_with = "no_stream")]
    pub blocking: bool,

    /// Wait for the full reply instead of streaming
    #[arg(long)]
    pub no_stream: bool,
}

#[derive(Args, Debug)]
pub struct CompleteArgs {
    /// Prompt text (use "-" for stdin)
    pub prompt: String,

    #[command(flatten)]
    pub target: ProviderArgs,

    #[arg(long)]
    pub max_tokens: Option<u32>,
}

#[derive(Args, Debug)]
pub struct ModelsArgs {
    /// Provider: openai, anthropic, openrouter, local
    #[arg(short, long)]
    pub provider: Option<String>,
}

#[derive(Args, Debug)]
pub struct GenerationArgs {
    /// Generation id returned by a completion
    pub id: String,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// `owner/name` or a hub link
    pub model: String,

    /// Destination root (default from config)
    #[arg(short, long)]
    pub dest: Option<PathBuf>,

    /// GGUF quantization preference, in order (repeatable)
    #[arg(long = "prefer", value_name = "QUANT")]
    pub prefer: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,
}

/// Model used when neither the command line nor the config names one.
fn default_model(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::OpenAI => Some("gpt-4o-mini"),
        Provider::Anthropic => Some("claude-3-5-haiku-latest"),
        Provider::OpenRouter => Some("openai/gpt-4o-mini"),
        Provider::Local => None,
    }
}

fn init_tracing(verbose: bool) {
    let filter = std::env::var(LOG_ENV).ok();
    if !verbose && filter.is_none() {
        return;
    }

    let filter = filter
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new("llmio=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Run a parsed command line.
pub async fn run(cli: Cli) -> ExitCode {
    init_tracing(cli.verbose);

    match run_inner(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e.display_message());
            ExitCode::FAILURE
        }
    }
}

async fn run_inner(command: Commands) -> Result<ExitCode> {
    if let Commands::Config(ConfigCommand::Path) = command {
        println!("{}", Config::path().display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load()?;
    match command {
        Commands::Chat(args) => run_chat(&config, args).await,
        Commands::Complete(args) => run_complete(&config, args).await,
        Commands::Models(args) => run_models(&config, args).await,
        Commands::Generation(args) => run_generation(&config, args).await,
        Commands::Download(args) => run_download(&config, args).await,
        Commands::Config(ConfigCommand::Path) => Ok(ExitCode::SUCCESS),
    }
}

/// Read the prompt, taking stdin for "-".
fn read_prompt(prompt: &str) -> Result<String> {
    let prompt = if prompt == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_string()
    } else {
        prompt.to_string()
    };

    if prompt.is_empty() {
        return Err(Error::EmptyPrompt);
    }
    Ok(prompt)
}

fn resolve_target(config: &Config, target: &ProviderArgs) -> Result<(Provider, String)> {
    let provider = config.resolve_provider(target.provider.as_deref())?;
    let model = target
        .model
        .clone()
        .or_else(|| config.model.clone())
        .or_else(|| default_model(provider).map(str::to_string))
        .ok_or_else(|| anyhow::anyhow!("No model for {provider}; pass --model"))?;
    Ok((provider, model))
}

fn stream_exit_code(summary: &StreamSummary) -> ExitCode {
    if !summary.text.ends_with('\n') {
        println!();
    }
    match summary.end {
        StreamEnd::Done => ExitCode::SUCCESS,
        StreamEnd::Truncated => {
            eprintln!("Warning: stream ended before [DONE]; reply may be incomplete");
            ExitCode::from(EXIT_INCOMPLETE)
        }
    }
}

async fn run_chat(config: &Config, args: ChatArgs) -> Result<ExitCode> {
    let (provider, model) = resolve_target(config, &args.target)?;
    let prompt = read_prompt(&args.prompt)?;

    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt));

    let request = ChatRequest::new(model, messages).with_params(Params {
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        ..Params::default()
    });
    let provider_config = config.provider_config(provider)?;

    if args.blocking {
        // Blocking reqwest must not run on the async runtime.
        let summary = tokio::task::spawn_blocking(move || {
            let client = BlockingClient::new(provider_config)?;
            let mut stdout = io::stdout().lock();
            client.print_chat_stream(&request, &mut stdout)
        })
        .await??;
        return Ok(stream_exit_code(&summary));
    }

    let client = Client::new(provider_config);
    if args.no_stream {
        let completion = client.chat_completion(&request).await?;
        println!("{}", completion.text().unwrap_or_default());
        return Ok(ExitCode::SUCCESS);
    }

    let stream = client.chat_completion_stream(&request).await?;
    // A closed stdout ends the stream instead of draining the reply.
    let printed = stream.for_each_delta(|delta| {
        let mut stdout = io::stdout().lock();
        stdout.write_all(delta.as_bytes())?;
        stdout.flush()
    });

    // Dropping the stream on Ctrl-C closes the connection.
    tokio::select! {
        summary = printed => Ok(stream_exit_code(&summary?)),
        _ = tokio::signal::ctrl_c() => {
            println!();
            eprintln!("Interrupted");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

async fn run_complete(config: &Config, args: CompleteArgs) -> Result<ExitCode> {
    let (provider, model) = resolve_target(config, &args.target)?;
    let prompt = read_prompt(&args.prompt)?;
    let client = Client::new(config.provider_config(provider)?);

    let mut request = TextCompletionRequest::new(model, prompt);
    request.params.max_tokens = args.max_tokens;

    let response = client.text_completion(&request).await?;
    println!("{}", response.text().unwrap_or_default());
    Ok(ExitCode::SUCCESS)
}

async fn run_models(config: &Config, args: ModelsArgs) -> Result<ExitCode> {
    let provider = config.resolve_provider(args.provider.as_deref())?;
    let client = Client::new(config.provider_config(provider)?);

    let models = client.models().await?;
    let mut stdout = io::stdout().lock();
    for id in models.ids() {
        writeln!(stdout, "{id}")?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_generation(config: &Config, args: GenerationArgs) -> Result<ExitCode> {
    let client = Client::new(config.provider_config(Provider::OpenRouter)?);
    let generation = client.generation(&args.id).await?.data;

    println!("id:         {}", generation.id);
    if let Some(model) = &generation.model {
        println!("model:      {model}");
    }
    if let Some(name) = &generation.provider_name {
        println!("provider:   {name}");
    }
    println!(
        "tokens:     {} prompt, {} completion",
        generation.tokens_prompt.unwrap_or_default(),
        generation.tokens_completion.unwrap_or_default()
    );
    println!("cost:       ${:.6}", generation.total_cost);
    if let Some(latency) = generation.latency {
        println!("latency:    {latency} ms");
    }
    if let Some(reason) = &generation.finish_reason {
        println!("finish:     {reason}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_download(config: &Config, args: DownloadArgs) -> Result<ExitCode> {
    let mut options = config.download.options();
    if let Some(dest) = args.dest {
        options.dest_dir = dest;
    }
    if !args.prefer.is_empty() {
        options.gguf_preference = args.prefer;
    }

    let hub = HubClient::from_env(config.download.hub_url.clone());
    eprintln!("Fetching file list...");
    let report = download::download(&hub, &args.model, &options).await?;
    Ok(print_report(&report))
}

fn print_report(report: &DownloadReport) -> ExitCode {
    for file in &report.downloaded {
        println!("{} ({} bytes)", file.path.display(), file.bytes);
    }
    for failed in &report.failed {
        eprintln!("Failed: {} ({})", failed.file, failed.error);
    }
    eprintln!(
        "{} file(s), {} bytes into {}",
        report.downloaded.len(),
        report.total_bytes(),
        report.dir.display()
    );

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INCOMPLETE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat() {
        let cli = Cli::parse_from([
            "llmio",
            "-v",
            "chat",
            "hello",
            "-p",
            "anthropic",
            "-m",
            "claude",
            "--system",
            "be brief",
            "--temperature",
            "0.5",
            "--max-tokens",
            "64",
        ]);
        assert!(cli.verbose);
        let Commands::Chat(args) = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(args.prompt, "hello");
        assert_eq!(args.target.provider.as_deref(), Some("anthropic"));
        assert_eq!(args.target.model.as_deref(), Some("claude"));
        assert_eq!(args.system.as_deref(), Some("be brief"));
        assert_eq!(args.temperature, Some(0.5));
        assert_eq!(args.max_tokens, Some(64));
        assert!(!args.blocking && !args.no_stream);
    }

    #[test]
    fn test_blocking_conflicts_with_no_stream() {
        let result = Cli::try_parse_from(["llmio", "chat", "hi", "--blocking", "--no-stream"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_download() {
        let cli = Cli::parse_from([
            "llmio",
            "download",
            "owner/Model-GGUF",
            "--dest",
            "/tmp/models",
            "--prefer",
            "Q8_0",
            "--prefer",
            "Q6_K",
        ]);
        let Commands::Download(args) = cli.command else {
            panic!("expected download");
        };
        assert_eq!(args.model, "owner/Model-GGUF");
        assert_eq!(args.dest, Some(PathBuf::from("/tmp/models")));
        assert_eq!(args.prefer, vec!["Q8_0", "Q6_K"]);
    }

    #[test]
    fn test_resolve_target() {
        let config = Config::default();
        let target = ProviderArgs {
            provider: Some("openai".into()),
            model: None,
        };
        let (provider, model) = resolve_target(&config, &target).unwrap();
        assert_eq!(provider, Provider::OpenAI);
        assert_eq!(model, "gpt-4o-mini");

        let target = ProviderArgs {
            provider: Some("local".into()),
            model: None,
        };
        assert!(resolve_target(&config, &target).is_err());

        let target = ProviderArgs {
            provider: Some("local".into()),
            model: Some("llama".into()),
        };
        assert_eq!(resolve_target(&config, &target).unwrap().1, "llama");
    }

    #[test]
    fn test_read_prompt_rejects_empty() {
        assert!(matches!(read_prompt(""), Err(Error::EmptyPrompt)));
        assert_eq!(read_prompt("hi").unwrap(), "hi");
    }
}
