use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use relightcore::{
    ImageSlot, ImageSource, OutputFormat, OutputQuality, PredictionEvent, PredictionInput, ProgressEvent, Workflow,
};
use relightruntime::{check_weights, Predictor, PredictorConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relight")]
#[command(about = "Relight images through a ComfyUI workflow", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single prediction
    Predict {
        /// Subject image (path, URL or data URI)
        #[arg(long)]
        subject: Option<ImageSource>,

        /// Background image
        #[arg(long)]
        background: Option<ImageSource>,

        /// Light map image
        #[arg(long)]
        light: Option<ImageSource>,

        #[arg(long, default_value = "")]
        negative_prompt: String,

        /// webp, jpg or png
        #[arg(long, default_value = "webp")]
        output_format: OutputFormat,

        /// 0-100; below 100 also recompresses png
        #[arg(long, default_value = "80")]
        output_quality: OutputQuality,

        /// Random when omitted
        #[arg(long)]
        seed: Option<u64>,

        /// Where results are copied
        #[arg(short, long, default_value = "outputs")]
        out_dir: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check a workflow against the node bindings and installed weights
    Validate {
        #[command(flatten)]
        engine: EngineArgs,
    },

    /// List the weight files a workflow references
    Weights {
        /// Path to workflow JSON file
        #[arg(short, long, env = "RELIGHT_WORKFLOW", default_value = "workflow_api.json")]
        workflow: PathBuf,
    },
}

/// Overrides applied on top of `RELIGHT_*` configuration
#[derive(Args)]
struct EngineArgs {
    /// Path to workflow JSON file
    #[arg(short, long, env = "RELIGHT_WORKFLOW")]
    workflow: Option<PathBuf>,

    /// ComfyUI checkout
    #[arg(long)]
    comfyui_dir: Option<PathBuf>,

    /// host:port of the engine
    #[arg(long, env = "RELIGHT_ENGINE_ADDRESS")]
    engine_address: Option<String>,

    /// Attach to a running engine instead of starting one
    #[arg(long)]
    attach: bool,
}

impl EngineArgs {
    fn config(self) -> Result<PredictorConfig> {
        let mut config = PredictorConfig::from_env().context("invalid configuration")?;
        if let Some(workflow) = self.workflow {
            config.workflow_path = workflow;
        }
        if let Some(dir) = self.comfyui_dir {
            config.temp_dir = dir.join("temp");
            config.comfyui_dir = dir;
        }
        if let Some(address) = self.engine_address {
            config.client.address = address;
        }
        if self.attach {
            config.launch_engine = false;
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Predict {
            subject,
            background,
            light,
            negative_prompt,
            output_format,
            output_quality,
            seed,
            out_dir,
            engine,
            verbose,
        } => {
            init_logging(verbose);

            let mut input = PredictionInput {
                negative_prompt,
                output_format,
                output_quality,
                seed,
                ..PredictionInput::default()
            };
            for (slot, source) in ImageSlot::ALL.into_iter().zip([subject, background, light]) {
                if let Some(source) = source {
                    input = input.with_image(slot, source);
                }
            }

            run_prediction(engine.config()?, input, out_dir).await?;
        }

        Commands::Validate { engine } => {
            validate_workflow(engine.config()?)?;
        }

        Commands::Weights { workflow } => {
            list_weights(workflow)?;
        }
    }

    Ok(())
}

async fn run_prediction(config: PredictorConfig, input: PredictionInput, out_dir: PathBuf) -> Result<()> {
    println!("🚀 Loading workflow from: {}", config.workflow_path.display());
    if config.launch_engine {
        println!("⏳ Starting engine in {}", config.comfyui_dir.display());
    }

    let predictor = Predictor::setup(config).await.context("predictor setup failed")?;
    println!("✅ Engine ready at {}", predictor.config().client.address);
    println!();

    let mut events = predictor.subscribe_events();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PredictionEvent::PredictionStarted { seed, .. } => {
                    println!("▶️  Prediction started (seed {})", seed);
                }
                PredictionEvent::Progress { event, .. } => match event {
                    ProgressEvent::InputStaged { slot, filename } => {
                        println!("  📥 Staged {} image as {}", slot, filename);
                    }
                    ProgressEvent::WorkflowQueued { prompt_id } => {
                        println!("  📋 Queued prompt {}", prompt_id);
                    }
                    ProgressEvent::NodeExecuted { node_id } => {
                        println!("  ⚡ Node {} produced output", node_id);
                    }
                    ProgressEvent::OutputWritten { path } => {
                        println!("  🖼️  {}", path.display());
                    }
                    ProgressEvent::Info { message } => {
                        println!("     ℹ️  {}", message);
                    }
                    ProgressEvent::Warning { message } => {
                        println!("     ⚠️  {}", message);
                    }
                },
                PredictionEvent::PredictionCompleted { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Prediction completed in {}ms", duration_ms);
                    } else {
                        println!("💥 Prediction failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let result = predictor.predict(&input).await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let copied = match result {
        Ok(files) => copy_outputs(&files, &predictor.config().output_dir, &out_dir),
        Err(e) => Err(anyhow::Error::new(e).context("prediction failed")),
    };
    predictor.shutdown().await?;
    let copied = copied?;

    println!();
    println!("📤 Outputs:");
    if copied.is_empty() {
        println!("   (none)");
    }
    for path in &copied {
        println!("   {}", path.display());
    }

    Ok(())
}

/// Copy results into `out_dir`, keeping their layout below the engine's output directory
fn copy_outputs(files: &[PathBuf], output_dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::with_capacity(files.len());
    for file in files {
        let relative = match file.strip_prefix(output_dir) {
            Ok(relative) => relative,
            Err(_) => match file.file_name() {
                Some(name) => Path::new(name),
                None => continue,
            },
        };
        let target = out_dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::copy(file, &target).with_context(|| format!("failed to copy {}", file.display()))?;
        copied.push(target);
    }
    Ok(copied)
}

fn validate_workflow(config: PredictorConfig) -> Result<()> {
    println!("🔍 Validating workflow: {}", config.workflow_path.display());

    let workflow = Workflow::load(&config.workflow_path)?;
    config.bindings.validate(&workflow)?;

    println!("✅ Workflow is valid:");
    println!("   Nodes: {}", workflow.len());
    for slot in ImageSlot::ALL {
        let node_id = config.bindings.image_node(slot);
        let title = workflow.node(node_id).and_then(|node| node.title()).unwrap_or("untitled");
        println!("   {} image -> node {} ({})", slot, node_id, title);
    }

    let report = check_weights(&workflow, &config.models_dir());
    println!();
    println!("📦 Weights under {}:", config.models_dir().display());
    for weight in &report.present {
        println!("  ✅ {}", weight);
    }
    for weight in &report.missing {
        println!("  ❌ {}", weight);
    }

    if !report.missing.is_empty() {
        println!();
        println!("⚠️  {} weight file(s) missing", report.missing.len());
    }

    Ok(())
}

fn list_weights(path: PathBuf) -> Result<()> {
    let workflow = Workflow::load(&path)?;
    for weight in workflow.referenced_weights() {
        println!("{}", weight);
    }
    Ok(())
}
