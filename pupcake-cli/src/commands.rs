//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use pupcake_core::{ExperimentConfig, WORKSPACE_CONFIG_FILE, load_config};
use pupcake_ml::{ModelKind, ModelOutcome, Workflow, check_dataset, load_splits};
use std::path::{Path, PathBuf};
use tracing::info;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            models,
            kfold,
            data,
        } => handle_run(workspace, config_path, models, kfold, data).await,
        Commands::Check { data } => handle_check(workspace, config_path, data).await,
        Commands::Config { action } => {
            handle_config(action.unwrap_or(ConfigAction::Show), workspace, config_path)
        }
        Commands::Status => handle_status(workspace, config_path),
    }
}

/// Load the layered configuration, apply CLI overrides and resolve relative
/// paths against the workspace.
fn resolve_config(
    workspace: &Path,
    config_path: Option<&Path>,
    data: Option<&Path>,
    kfold: Option<usize>,
) -> anyhow::Result<ExperimentConfig> {
    let mut config = load_config(Some(workspace), config_path)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(data) = data {
        config.dataset = config.dataset.with_data_root(data);
    }
    if let Some(k) = kfold {
        config.dataset.kfold_count = k;
    }
    let config = config.rooted_at(workspace);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    Ok(config)
}

async fn handle_run(
    workspace: &Path,
    config_path: Option<&Path>,
    models: Vec<ModelKind>,
    kfold: Option<usize>,
    data: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = resolve_config(workspace, config_path, data.as_deref(), kfold)?;

    // Training is CPU-bound and blocks for a long time.
    let outcomes = tokio::task::spawn_blocking(move || run_workflow(&config, &models)).await??;

    println!();
    println!(
        "  {:<10} {:>8} {:>12} {:>8} {:>8}",
        "Model", "Loss", "Accuracy (%)", "Tuned", "K-Fold"
    );
    for outcome in &outcomes {
        println!(
            "  {:<10} {:>8.3} {:>12.3} {:>8} {:>8}",
            outcome.record.model,
            outcome.record.loss,
            outcome.record.accuracy * 100.0,
            if outcome.tuning_ran { "ran" } else { "cached" },
            if outcome.cross_validation_ran { "ran" } else { "cached" },
        );
    }
    Ok(())
}

fn run_workflow(
    config: &ExperimentConfig,
    models: &[ModelKind],
) -> anyhow::Result<Vec<ModelOutcome>> {
    let fail = |e: pupcake_ml::MlError| anyhow::anyhow!("{}", e);
    check_dataset(&config.dataset).map_err(fail)?;
    let workflow = Workflow::from_config(config).map_err(fail)?;
    let mut rng = workflow.seeds().rng("dataset");
    let splits = load_splits(&config.dataset, &mut rng).map_err(fail)?;
    workflow
        .run(models, &splits.train, &splits.val, &splits.test)
        .map_err(fail)
}

async fn handle_check(
    workspace: &Path,
    config_path: Option<&Path>,
    data: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = resolve_config(workspace, config_path, data.as_deref(), None)?;
    let census = check_dataset(&config.dataset).map_err(|e| anyhow::anyhow!("{}", e))?;

    println!("Dataset: {}", config.dataset.data_path.display());
    for (split, counts) in [("train", &census.train), ("test", &census.test)] {
        for (class, count) in counts {
            println!("  {split:<6} {class:<16} {count:>6} images");
        }
    }
    match &config.dataset.val_dir {
        Some(dir) => println!("  validation from {}", dir.display()),
        None => println!(
            "  validation split {:.0}% of train",
            config.dataset.validation_split * 100.0
        ),
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = resolve_config(workspace, config_path, None, None)?;
            let toml_str = config
                .to_toml()
                .map_err(|e| anyhow::anyhow!("Failed to render config: {}", e))?;
            println!("{}", toml_str);
            Ok(())
        }
        ConfigAction::Init => {
            let path = workspace.join(WORKSPACE_CONFIG_FILE);
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = ExperimentConfig::default()
                .to_toml()
                .map_err(|e| anyhow::anyhow!("Failed to render config: {}", e))?;
            std::fs::write(&path, &toml_str)?;
            info!(path = %path.display(), "Default configuration written");
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
    }
}

fn handle_status(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = resolve_config(workspace, config_path, None, None)?;
    let workflow = Workflow::from_config(&config).map_err(|e| anyhow::anyhow!("{}", e))?;

    println!("Models: {}", config.paths.models_dir.display());
    for status in workflow.status(&ModelKind::ALL) {
        println!(
            "  {:<10} tuned: {:<4} fold-trained: {}",
            status.model.name(),
            if status.tuned { "yes" } else { "no" },
            if status.fold_trained { "yes" } else { "no" },
        );
    }
    Ok(())
}
