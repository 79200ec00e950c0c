//! Glossa command line.
//!
//! Usage:
//!     glossa --profile en --input sentences.json > analyses.json
//!     glossa --check-models

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;

use glossa_lib::config::{self, PipelineConfig};
use glossa_lib::pipeline::generation::OllamaClient;
use glossa_lib::profile::{builtin_ids, builtin_profile};
use glossa_lib::{AnalysisPipeline, CancellationToken, ComplexityTier, LanguageProfile};

#[derive(Parser, Debug)]
#[command(name = "glossa", version, about = "Word-by-word grammatical analysis of sentences")]
struct Args {
    /// Built-in language id, path to a profile JSON file, or the id of a file
    /// in the profiles directory
    #[arg(long, env = "GLOSSA_PROFILE", default_value = "en")]
    profile: String,

    /// JSON array of {sentence, target_word, tier?} objects ("-" reads stdin)
    #[arg(long, short, default_value = "-")]
    input: String,

    /// Write results here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Tier for requests that don't name one
    #[arg(long, default_value = "intermediate")]
    tier: ComplexityTier,

    #[arg(long, env = "GLOSSA_PRIMARY_MODEL")]
    primary_model: Option<String>,

    #[arg(long, env = "GLOSSA_SECONDARY_MODEL")]
    secondary_model: Option<String>,

    /// Generation service URL
    #[arg(long, env = "GLOSSA_BASE_URL")]
    base_url: Option<String>,

    /// Sentences per batch call
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Chunks processed in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// List the models the service has and exit
    #[arg(long)]
    check_models: bool,
}

#[derive(Debug, Deserialize)]
struct InputRequest {
    sentence: String,
    #[serde(default)]
    target_word: String,
    tier: Option<ComplexityTier>,
}

fn main() -> anyhow::Result<()> {
    glossa_lib::init_tracing();
    let args = Args::parse();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let mut config = PipelineConfig::from_env();
    if let Some(model) = args.primary_model.clone() {
        config.primary_model = model;
    }
    if let Some(model) = args.secondary_model.clone() {
        config.secondary_model = model;
    }
    if let Some(url) = args.base_url.clone() {
        config.base_url = url;
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }
    if let Some(n) = args.concurrency {
        config.max_concurrent_chunks = n;
    }

    let client = OllamaClient::new(&config.base_url, Duration::from_secs(5))
        .context("Failed to build HTTP client")?;

    if args.check_models {
        let models = client
            .list_models()
            .with_context(|| format!("Could not reach {}", client.base_url()))?;
        for model in &models {
            let mark = if *model == config.primary_model || *model == config.secondary_model { "*" } else { " " };
            println!("{mark} {model}");
        }
        for wanted in [&config.primary_model, &config.secondary_model] {
            if !models.contains(wanted) {
                tracing::warn!(model = %wanted, "Configured model is not installed");
            }
        }
        return Ok(());
    }

    let profile = Arc::new(load_profile(&args.profile)?);
    let inputs = read_inputs(&args.input)?;
    let pipeline = AnalysisPipeline::new(profile, Box::new(client), config)?;

    let requests: Vec<_> = inputs
        .into_iter()
        .map(|r| pipeline.request(r.sentence, r.target_word, r.tier.unwrap_or(args.tier)))
        .collect();

    let outcome = pipeline.run_with(&requests, &CancellationToken::new(), None);
    tracing::info!(
        batch_id = %outcome.summary.batch_id,
        generated = outcome.summary.generated,
        fallback = outcome.summary.fallback,
        chunk_calls = outcome.summary.chunk_calls,
        single_resubmissions = outcome.summary.single_resubmissions,
        duration_ms = outcome.summary.duration_ms,
        "Done"
    );

    let results: Vec<_> = outcome.results.into_iter().flatten().collect();
    let json = serde_json::to_string_pretty(&results)?;
    match args.output {
        Some(path) => std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn load_profile(name: &str) -> anyhow::Result<LanguageProfile> {
    if builtin_ids().contains(&name.trim().to_lowercase().as_str()) {
        return Ok(builtin_profile(name)?);
    }
    let path = Path::new(name);
    if path.is_file() {
        return Ok(LanguageProfile::from_path(path)?);
    }
    let stored = config::profiles_dir().join(format!("{name}.json"));
    if stored.is_file() {
        return Ok(LanguageProfile::from_path(&stored)?);
    }
    bail!(
        "Unknown profile '{name}' (built-in: {}; searched {})",
        builtin_ids().join(", "),
        config::profiles_dir().display()
    )
}

fn read_inputs(source: &str) -> anyhow::Result<Vec<InputRequest>> {
    let mut raw = String::new();
    if source == "-" {
        std::io::stdin().read_to_string(&mut raw).context("Failed to read stdin")?;
    } else {
        raw = std::fs::read_to_string(source).with_context(|| format!("Failed to read {source}"))?;
    }
    serde_json::from_str(&raw).context("Input must be a JSON array of {sentence, target_word, tier?}")
}
