use anyhow::{Context, Result, bail};
use callrelay::backend::{
    HttpSynthesizer, NullTranscriptSource, OpenAiReplyGenerator, TranscriptSource,
    TranscriptSourceFactory,
};
use callrelay::cli::{Cli, Commands, ConfigAction};
use callrelay::config::Config;
use callrelay::pipeline::{CallPipeline, CallPipelineConfig};
use callrelay::transport::{AppState, serve};
use clap::{CommandFactory, Parser};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => {
            callrelay::logging::init(cli.verbose, cli.quiet);
            let config = cli.apply_overrides(load_config(cli.config.as_deref())?);
            run_server(config).await?;
        }
        Some(Commands::Config { ref action }) => {
            handle_config_command(&cli, action)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "callrelay",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else {
        // Try default path, fall back to defaults
        Config::load_or_default(&Config::default_path())?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

async fn run_server(config: Config) -> Result<()> {
    config.validate()?;

    let Some(llm_key) = config.llm.api_key.clone() else {
        bail!(
            "no API key configured: set llm.api_key in {} or CALLRELAY_OPENAI_API_KEY / OPENAI_API_KEY",
            Config::default_path().display()
        );
    };
    let tts_key = config.tts_api_key().unwrap_or(&llm_key).to_string();

    let pipeline = CallPipeline::new(
        CallPipelineConfig::from_config(&config),
        Arc::new(OpenAiReplyGenerator::new(&config.llm, llm_key)),
        Arc::new(HttpSynthesizer::new(&config.tts, tts_key)),
    );
    // Speech-to-text is provided by an external integration.
    let transcripts: TranscriptSourceFactory =
        Arc::new(|| -> Box<dyn TranscriptSource> { Box::new(NullTranscriptSource) });

    info!(
        version = %callrelay::version_string(),
        model = %config.llm.model,
        max_concurrent_synthesis = config.pipeline.max_concurrent_synthesis,
        "starting callrelay"
    );

    let state = AppState::new(Arc::new(pipeline), transcripts, &config);
    serve(&config, state).await
}

fn handle_config_command(cli: &Cli, action: &ConfigAction) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let mut shown = cli.apply_overrides(load_config(cli.config.as_deref())?);
            if shown.llm.api_key.is_some() {
                shown.llm.api_key = Some("<redacted>".to_string());
            }
            if shown.tts.api_key.is_some() {
                shown.tts.api_key = Some("<redacted>".to_string());
            }
            let toml = toml::to_string_pretty(&shown).context("Failed to render configuration")?;
            print!("{}", toml);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}
