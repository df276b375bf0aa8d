use crate::config::PredictorConfig;
use crate::patch::{self, WorkflowPatch};
use crate::{optimise, seed, staging, weights};
use chrono::Utc;
use relightcomfy::{ComfyClient, ComfyServer, Engine};
use relightcore::{
    EventBus, EventEmitter, ImageSlot, InputError, PredictionEvent, PredictionId, PredictionInput, ProgressEvent,
    RelightError, Workflow,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Runs predictions against a single workflow
pub struct Predictor {
    config: PredictorConfig,
    engine: Arc<dyn Engine>,
    event_bus: Arc<EventBus>,
    http: reqwest::Client,
    client_id: String,
    /// Loaded once at setup for validation; predictions reload from disk
    workflow: Workflow,
    /// Staging directories are shared, so one prediction runs at a time
    run_lock: Mutex<()>,
    server: Mutex<Option<ComfyServer>>,
}

impl Predictor {
    /// Start (or attach to) the engine and load the workflow
    pub async fn setup(config: PredictorConfig) -> Result<Self, RelightError> {
        let client = ComfyClient::new(config.client.clone())?;

        staging::cleanup(&config.staging_dirs()).await?;

        let server = if config.launch_engine {
            Some(ComfyServer::start(&config.server_options(), &client, config.startup_timeout).await?)
        } else {
            tracing::info!("Attaching to engine at {}", client.address());
            client.wait_until_ready(config.startup_timeout).await?;
            None
        };

        let mut predictor = Self::with_engine(config, Arc::new(client))?;
        predictor.server = Mutex::new(server);
        predictor.report_weights();
        Ok(predictor)
    }

    /// Build a predictor around an already-running engine
    pub fn with_engine(config: PredictorConfig, engine: Arc<dyn Engine>) -> Result<Self, RelightError> {
        let workflow = Workflow::load(&config.workflow_path)?;
        config.bindings.validate(&workflow)?;

        tracing::info!(
            "Loaded workflow {} ({} nodes)",
            config.workflow_path.display(),
            workflow.len()
        );

        Ok(Self {
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            http: staging::http_client(config.download_timeout)?,
            client_id: Uuid::new_v4().to_string(),
            workflow,
            run_lock: Mutex::new(()),
            server: Mutex::new(None),
            engine,
            config,
        })
    }

    fn report_weights(&self) {
        let report = weights::check_weights(&self.workflow, &self.config.models_dir());
        for weight in &report.present {
            tracing::info!("Weight available: {}", weight);
        }
        for weight in &report.missing {
            tracing::warn!(
                "Weight {} not found under {}",
                weight,
                self.config.models_dir().display()
            );
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Subscribe to prediction events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<PredictionEvent> {
        self.event_bus.subscribe()
    }

    /// Stop the engine process if this predictor started it
    pub async fn shutdown(&self) -> Result<(), RelightError> {
        let _guard = self.run_lock.lock().await;
        if let Some(server) = self.server.lock().await.take() {
            server.shutdown().await?;
        }
        Ok(())
    }

    /// Run one prediction and return the produced files
    pub async fn predict(&self, input: &PredictionInput) -> Result<Vec<PathBuf>, RelightError> {
        let _guard = self.run_lock.lock().await;

        let prediction_id = PredictionId::new_v4();
        let events = self.event_bus.create_emitter(prediction_id);
        let start_time = Instant::now();

        let result = self.run(input, &events).await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        match &result {
            Ok(files) => tracing::info!("Prediction {} produced {} file(s) in {}ms", prediction_id, files.len(), duration_ms),
            Err(e) => tracing::error!("Prediction {} failed: {}", prediction_id, e),
        }

        self.event_bus.emit(PredictionEvent::PredictionCompleted {
            prediction_id,
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }

    async fn run(&self, input: &PredictionInput, events: &EventEmitter) -> Result<Vec<PathBuf>, RelightError> {
        let seed = seed::resolve(input.seed);
        self.event_bus.emit(PredictionEvent::PredictionStarted {
            prediction_id: events.prediction_id(),
            seed,
            timestamp: Utc::now(),
        });

        let mut workflow = Workflow::load(&self.config.workflow_path)?;
        for slot in patch::required_slots(&workflow, &self.config.bindings) {
            if input.image(slot).is_none() {
                return Err(InputError::MissingImage {
                    slot,
                    node_id: self.config.bindings.image_node(slot).to_string(),
                }
                .into());
            }
        }

        if let Err(e) = self.engine.clear_queue().await {
            tracing::warn!("Failed to clear engine queue: {}", e);
            events.warn(format!("queue not cleared: {}", e));
        }
        staging::cleanup(&self.config.staging_dirs()).await?;

        let mut image_filenames: [Option<String>; 3] = Default::default();
        for slot in ImageSlot::ALL {
            if let Some(source) = input.image(slot) {
                let filename = staging::stage_input(&self.http, source, slot, &self.config.input_dir).await?;
                events.emit(ProgressEvent::InputStaged {
                    slot,
                    filename: filename.clone(),
                });
                image_filenames[slot.index() - 1] = Some(filename);
            }
        }
        tracing::info!("Image filenames: {:?}", image_filenames);

        patch::update_workflow(
            &mut workflow,
            &self.config.bindings,
            &WorkflowPatch {
                image_filenames,
                negative_prompt: input.negative_prompt.clone(),
                seed,
            },
        )?;

        let prompt_id = self.engine.queue_prompt(&workflow, &self.client_id).await?;
        events.emit(ProgressEvent::WorkflowQueued {
            prompt_id: prompt_id.clone(),
        });
        self.engine.wait_for_completion(&prompt_id, events).await?;

        let output_dir = self.config.output_dir.clone();
        let format = input.output_format;
        let quality = input.output_quality;
        let outputs = tokio::task::spawn_blocking(move || {
            let files = optimise::collect_files(&output_dir)?;
            optimise::optimise_image_files(format, quality, files)
        })
        .await
        .map_err(|e| RelightError::Output(format!("output task failed: {}", e)))??;

        if outputs.is_empty() {
            tracing::warn!("Prompt {} produced no output files", prompt_id);
        }
        for path in &outputs {
            events.emit(ProgressEvent::OutputWritten { path: path.clone() });
        }

        Ok(outputs)
    }
}
