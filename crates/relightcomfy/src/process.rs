// Supervises a ComfyUI server running as a child process

use crate::{ComfyClient, Engine};
use relightcore::EngineError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};

/// Environment forced on the engine so model hubs are never contacted
pub const OFFLINE_ENV: &[(&str, &str)] = &[
    ("HF_DATASETS_OFFLINE", "1"),
    ("TRANSFORMERS_OFFLINE", "1"),
    ("HF_HUB_DISABLE_TELEMETRY", "1"),
];

/// How to launch the engine
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub python: PathBuf,
    pub comfyui_dir: PathBuf,
    /// host:port to listen on
    pub address: String,
    pub output_dir: PathBuf,
    pub input_dir: PathBuf,
    pub extra_args: Vec<String>,
}

impl ServerOptions {
    fn host_and_port(&self) -> Result<(&str, &str), EngineError> {
        self.address
            .rsplit_once(':')
            .filter(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .ok_or_else(|| EngineError::Spawn(format!("invalid listen address: {}", self.address)))
    }

    /// Build the launch command
    pub fn command(&self) -> Result<Command, EngineError> {
        let (host, port) = self.host_and_port()?;

        let mut cmd = Command::new(&self.python);
        cmd.arg(self.comfyui_dir.join("main.py"))
            .args(["--listen", host, "--port", port])
            .arg("--output-directory")
            .arg(&self.output_dir)
            .arg("--input-directory")
            .arg(&self.input_dir)
            .arg("--disable-metadata")
            .args(&self.extra_args);

        for (key, value) in OFFLINE_ENV {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

/// A running engine. Dropping it kills the child process.
pub struct ComfyServer {
    child: Child,
}

impl ComfyServer {
    /// Spawn the engine without waiting for it to come up
    pub fn spawn(options: &ServerOptions) -> Result<Self, EngineError> {
        let mut cmd = options.command()?;
        tracing::info!(
            "Starting engine: {} {}",
            options.python.display(),
            options.comfyui_dir.join("main.py").display()
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", options.python.display(), e)))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr"));
        }

        Ok(Self { child })
    }

    /// Spawn the engine and wait until its HTTP API answers
    pub async fn start(
        options: &ServerOptions,
        client: &ComfyClient,
        deadline: Duration,
    ) -> Result<Self, EngineError> {
        let mut server = Self::spawn(options)?;
        server.wait_until_ready(client, deadline).await?;
        Ok(server)
    }

    async fn wait_until_ready(
        &mut self,
        client: &ComfyClient,
        deadline: Duration,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        loop {
            if let Some(status) = self.exit_status()? {
                return Err(EngineError::Spawn(format!("engine exited during startup: {}", status)));
            }
            if client.health_check().await {
                tracing::info!("Engine started in {}ms", started.elapsed().as_millis());
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(EngineError::Timeout {
                    what: "engine startup".to_string(),
                    seconds: deadline.as_secs(),
                });
            }
            sleep(client.config().poll_interval).await;
        }
    }

    /// `Some` once the child has exited
    pub fn exit_status(&mut self) -> Result<Option<std::process::ExitStatus>, EngineError> {
        self.child
            .try_wait()
            .map_err(|e| EngineError::Spawn(format!("failed to poll engine process: {}", e)))
    }

    pub async fn shutdown(mut self) -> Result<(), EngineError> {
        tracing::info!("Stopping engine");
        self.child
            .kill()
            .await
            .map_err(|e| EngineError::Spawn(format!("failed to stop engine: {}", e)))
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, stream_name: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "comfyui", stream = stream_name, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ServerOptions {
        ServerOptions {
            python: PathBuf::from("python"),
            comfyui_dir: PathBuf::from("ComfyUI"),
            address: "127.0.0.1:8188".to_string(),
            output_dir: PathBuf::from("/tmp/outputs"),
            input_dir: PathBuf::from("/tmp/inputs"),
            extra_args: vec!["--cpu".to_string()],
        }
    }

    #[test]
    fn test_command_arguments() {
        let cmd = options().command().unwrap();
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "python");

        let args: Vec<String> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "ComfyUI/main.py",
                "--listen",
                "127.0.0.1",
                "--port",
                "8188",
                "--output-directory",
                "/tmp/outputs",
                "--input-directory",
                "/tmp/inputs",
                "--disable-metadata",
                "--cpu",
            ]
        );
    }

    #[test]
    fn test_command_forces_offline_env() {
        let cmd = options().command().unwrap();
        let envs: Vec<(String, String)> = cmd
            .as_std()
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().into_owned(), v?.to_string_lossy().into_owned())))
            .collect();
        for (key, value) in OFFLINE_ENV {
            assert!(envs.contains(&(key.to_string(), value.to_string())), "missing {}", key);
        }
    }

    #[test]
    fn test_invalid_address_rejected() {
        let mut opts = options();
        opts.address = "localhost".to_string();
        assert!(matches!(opts.command(), Err(EngineError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_start_detects_early_exit() {
        let mut opts = options();
        opts.python = PathBuf::from("false");
        opts.address = "127.0.0.1:1".to_string();
        let client = ComfyClient::new(crate::ClientConfig {
            address: opts.address.clone(),
            poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_millis(200),
            ..crate::ClientConfig::default()
        })
        .unwrap();

        let err = ComfyServer::start(&opts, &client, Duration::from_secs(10))
            .await
            .err()
            .unwrap();
        match err {
            EngineError::Spawn(message) => assert!(message.contains("engine exited during startup"), "{}", message),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_interpreter() {
        let mut opts = options();
        opts.python = PathBuf::from("/nonexistent/python-for-relight-tests");
        assert!(matches!(ComfyServer::spawn(&opts), Err(EngineError::Spawn(_))));
    }
}
