pub mod config;
pub mod pipeline;
pub mod profile; // Language profiles (roles, colors, rules, prompts)

pub use config::PipelineConfig;
pub use pipeline::{AnalysisPipeline, AnalysisRequest, AnalysisResult, CancellationToken};
pub use profile::{ComplexityTier, ConfigurationError, LanguageProfile};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` wins over the default filter.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
