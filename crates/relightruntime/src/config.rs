use relightcomfy::{ClientConfig, ServerOptions};
use relightcore::{NodeBindings, RelightError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the predictor
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// API-format workflow, reloaded for every prediction
    pub workflow_path: PathBuf,
    /// Where the engine writes results
    pub output_dir: PathBuf,
    /// Where request images are staged for the engine
    pub input_dir: PathBuf,
    /// Engine scratch space, cleared with the other two
    pub temp_dir: PathBuf,
    /// ComfyUI checkout; `main.py` and `models/` live here
    pub comfyui_dir: PathBuf,
    pub python: PathBuf,
    /// Start the engine as a child process instead of attaching to one
    pub launch_engine: bool,
    pub engine_args: Vec<String>,
    pub startup_timeout: Duration,
    /// Upper bound for fetching one input image by URL
    pub download_timeout: Duration,
    pub client: ClientConfig,
    pub bindings: NodeBindings,
    pub event_buffer_size: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            workflow_path: PathBuf::from("workflow_api.json"),
            output_dir: PathBuf::from("/tmp/outputs"),
            input_dir: PathBuf::from("/tmp/inputs"),
            temp_dir: PathBuf::from("ComfyUI/temp"),
            comfyui_dir: PathBuf::from("ComfyUI"),
            python: PathBuf::from("python"),
            launch_engine: true,
            engine_args: Vec::new(),
            startup_timeout: Duration::from_secs(300),
            download_timeout: Duration::from_secs(60),
            client: ClientConfig::default(),
            bindings: NodeBindings::default(),
            event_buffer_size: 256,
        }
    }
}

impl PredictorConfig {
    /// Defaults overridden by `RELIGHT_*` environment variables
    pub fn from_env() -> Result<Self, RelightError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelightError> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RELIGHT_WORKFLOW") {
            config.workflow_path = PathBuf::from(v);
        }
        if let Some(v) = get("RELIGHT_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RELIGHT_INPUT_DIR") {
            config.input_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RELIGHT_COMFYUI_DIR") {
            config.comfyui_dir = PathBuf::from(v);
            config.temp_dir = config.comfyui_dir.join("temp");
        }
        if let Some(v) = get("RELIGHT_TEMP_DIR") {
            config.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RELIGHT_PYTHON") {
            config.python = PathBuf::from(v);
        }
        if let Some(v) = get("RELIGHT_ENGINE_ADDRESS") {
            config.client.address = v;
        }
        if let Some(v) = get("RELIGHT_LAUNCH_ENGINE") {
            config.launch_engine = parse_bool("RELIGHT_LAUNCH_ENGINE", &v)?;
        }
        if let Some(v) = get("RELIGHT_ENGINE_ARGS") {
            config.engine_args = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = get("RELIGHT_STARTUP_TIMEOUT_SECS") {
            config.startup_timeout = parse_secs("RELIGHT_STARTUP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RELIGHT_DOWNLOAD_TIMEOUT_SECS") {
            config.download_timeout = parse_secs("RELIGHT_DOWNLOAD_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RELIGHT_EXECUTION_TIMEOUT_SECS") {
            config.client.execution_timeout = parse_secs("RELIGHT_EXECUTION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RELIGHT_IMAGE_NODES") {
            let ids: Vec<String> = v.split(',').map(|s| s.trim().to_string()).collect();
            config.bindings.images = <[String; 3]>::try_from(ids).map_err(|_| {
                RelightError::Config(format!(
                    "RELIGHT_IMAGE_NODES needs three comma-separated node ids, got '{}'",
                    v
                ))
            })?;
        }
        if let Some(v) = get("RELIGHT_NEGATIVE_PROMPT_NODE") {
            config.bindings.negative_prompt = Some(v);
        }
        if let Some(v) = get("RELIGHT_SEED_NODE") {
            config.bindings.seed = Some(v);
        }

        Ok(config)
    }

    /// Directories emptied before every prediction
    pub fn staging_dirs(&self) -> [&Path; 3] {
        [&self.output_dir, &self.input_dir, &self.temp_dir]
    }

    pub fn models_dir(&self) -> PathBuf {
        self.comfyui_dir.join("models")
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            python: self.python.clone(),
            comfyui_dir: self.comfyui_dir.clone(),
            address: self.client.address.clone(),
            output_dir: self.output_dir.clone(),
            input_dir: self.input_dir.clone(),
            extra_args: self.engine_args.clone(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, RelightError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RelightError::Config(format!("{} must be a boolean, got '{}'", key, value))),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, RelightError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| RelightError::Config(format!("{} must be a number of seconds, got '{}'", key, value)))
}
