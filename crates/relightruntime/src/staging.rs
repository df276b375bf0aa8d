//! Staging of request images into the engine's input directory

use base64::{engine::general_purpose, Engine as _};
use relightcore::{ImageSlot, ImageSource, InputError, RelightError};
use std::path::Path;
use std::time::Duration;

/// Remove each directory if present and recreate it empty
pub async fn cleanup(dirs: &[&Path]) -> Result<(), RelightError> {
    for dir in dirs {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(dir).await?;
        tracing::debug!("Cleaned {}", dir.display());
    }
    Ok(())
}

/// HTTP client for image downloads; `timeout` bounds each whole request
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, RelightError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RelightError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// `image{n}` plus the source's own extension
pub fn staged_filename(source: &ImageSource, slot: ImageSlot) -> String {
    let extension = source.extension().unwrap_or_else(|| ".png".to_string());
    format!("{}{}", slot.file_prefix(), extension)
}

/// Put the source into `input_dir` under its staged name and return that name
pub async fn stage_input(
    http: &reqwest::Client,
    source: &ImageSource,
    slot: ImageSlot,
    input_dir: &Path,
) -> Result<String, RelightError> {
    let filename = staged_filename(source, slot);
    let target = input_dir.join(&filename);

    match source {
        ImageSource::Path(path) => {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(InputError::ImageNotFound(path.display().to_string()).into());
            }
            tokio::fs::copy(path, &target).await?;
        }
        ImageSource::Url(url) => {
            let bytes = download(http, url).await?;
            tokio::fs::write(&target, bytes).await?;
        }
        ImageSource::DataUri(uri) => {
            let bytes = decode_data_uri(uri)?;
            tokio::fs::write(&target, bytes).await?;
        }
    }

    tracing::info!("Staged {} image {} as {}", slot, source, filename);
    Ok(filename)
}

async fn download(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, InputError> {
    let fail = |reason: String| InputError::Download {
        url: url.to_string(),
        reason,
    };

    let response = http.get(url).send().await.map_err(|e| fail(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fail(format!("status {}", response.status())));
    }
    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
    Ok(bytes.to_vec())
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>, InputError> {
    let (_, payload) = uri
        .split_once(";base64,")
        .ok_or_else(|| InputError::InvalidDataUri("missing base64 payload".to_string()))?;
    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| InputError::InvalidDataUri(e.to_string()))
}
