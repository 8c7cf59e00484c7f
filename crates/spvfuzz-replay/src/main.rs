//! Replay a recorded sequence of transformations against a module.
//!
//! Usage: `spvfuzz-replay [config.json]`. Without an argument the config
//! path comes from `SPVFUZZ_REPLAY_CONFIG`, and without that the defaults
//! are used.

mod telemetry;

use anyhow::{Context, Result};
use spvfuzz_core::ReplayConfig;
use spvfuzz_ir::{validation, Module};
use spvfuzz_transform::{Session, TransformationMessage};
use std::path::PathBuf;
use tracing::{info, warn};

fn config_path(args: impl IntoIterator<Item = String>, env: Option<String>) -> Option<PathBuf> {
    args.into_iter().nth(1).or(env).map(PathBuf::from)
}

fn load_config() -> Result<ReplayConfig> {
    match config_path(std::env::args(), std::env::var("SPVFUZZ_REPLAY_CONFIG").ok()) {
        Some(path) => ReplayConfig::from_json_file(&path)
            .with_context(|| format!("reading config {}", path.display())),
        None => Ok(ReplayConfig::default()),
    }
}

fn run(config: &ReplayConfig) -> Result<()> {
    let module_json = std::fs::read_to_string(&config.module_path)
        .with_context(|| format!("reading module {}", config.module_path.display()))?;
    let module = Module::from_json(&module_json)?;
    validation::validate_module(&module).context("input module is invalid")?;

    let messages_json = std::fs::read_to_string(&config.transformations_path).with_context(|| {
        format!("reading transformations {}", config.transformations_path.display())
    })?;
    let messages = TransformationMessage::sequence_from_json(&messages_json)?;
    info!(
        module = %config.module_path.display(),
        transformations = messages.len(),
        "replaying"
    );

    let mut session = Session::new(module, config.session.clone())?;
    let applied = session.apply_all(&messages, config.stop_on_rejection)?;
    if applied < messages.len() {
        warn!(rejected = messages.len() - applied, "some transformations did not apply");
    }

    let facts = session.facts().version();
    let module = session.into_module();
    validation::validate_module(&module).context("transformed module is invalid")?;

    if let Some(path) = &config.output_path {
        std::fs::write(path, module.to_json()?)
            .with_context(|| format!("writing module {}", path.display()))?;
        info!(output = %path.display(), "wrote transformed module");
    }
    info!(
        applied,
        facts,
        id_bound = module.id_bound,
        instructions = module.total_instructions(),
        "replay finished"
    );
    Ok(())
}

fn main() -> Result<()> {
    telemetry::init_telemetry();
    let config = load_config()?;
    run(&config)
}
