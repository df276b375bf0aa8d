use crate::InputError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The three image inputs the workflow accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSlot {
    Subject,
    Background,
    Light,
}

impl ImageSlot {
    pub const ALL: [ImageSlot; 3] = [ImageSlot::Subject, ImageSlot::Background, ImageSlot::Light];

    /// 1-based position, also used in the staged file name
    pub fn index(self) -> usize {
        match self {
            ImageSlot::Subject => 1,
            ImageSlot::Background => 2,
            ImageSlot::Light => 3,
        }
    }

    pub fn file_prefix(self) -> String {
        format!("image{}", self.index())
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageSlot::Subject => "subject",
            ImageSlot::Background => "background",
            ImageSlot::Light => "light",
        };
        f.write_str(name)
    }
}

/// Where an input image comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageSource {
    Path(PathBuf),
    Url(String),
    DataUri(String),
}

impl ImageSource {
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let raw = raw.trim();
        if raw.starts_with("data:") {
            if !raw.contains(";base64,") {
                return Err(InputError::InvalidDataUri(
                    "only base64 data URIs are supported".to_string(),
                ));
            }
            Ok(ImageSource::DataUri(raw.to_string()))
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            Ok(ImageSource::Url(raw.to_string()))
        } else if raw.is_empty() {
            Err(InputError::ImageNotFound("(empty path)".to_string()))
        } else {
            Ok(ImageSource::Path(PathBuf::from(raw)))
        }
    }

    /// File extension of the source including the dot, if one can be told
    pub fn extension(&self) -> Option<String> {
        match self {
            ImageSource::Path(path) => path_extension(path),
            ImageSource::Url(url) => {
                let without_query = url.split(['?', '#']).next().unwrap_or(url);
                let last_segment = without_query.rsplit('/').next().unwrap_or("");
                path_extension(Path::new(last_segment))
            }
            ImageSource::DataUri(uri) => {
                let mime = uri.strip_prefix("data:")?.split(';').next()?;
                mime_extension(mime).map(str::to_string)
            }
        }
    }
}

fn path_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext))
}

fn mime_extension(mime: &str) -> Option<&'static str> {
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => Some(".png"),
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "image/webp" => Some(".webp"),
        "image/gif" => Some(".gif"),
        "image/bmp" => Some(".bmp"),
        "image/tiff" => Some(".tiff"),
        _ => None,
    }
}

impl TryFrom<String> for ImageSource {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ImageSource::parse(&value)
    }
}

impl From<ImageSource> for String {
    fn from(source: ImageSource) -> Self {
        match source {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Url(url) => url,
            ImageSource::DataUri(uri) => uri,
        }
    }
}

impl FromStr for ImageSource {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageSource::parse(s)
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => write!(f, "{}", path.display()),
            ImageSource::Url(url) => f.write_str(url),
            ImageSource::DataUri(uri) => {
                let header = uri.split(',').next().unwrap_or("data:");
                write!(f, "{},...", header)
            }
        }
    }
}

/// Encoding of the returned images
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputFormat {
    #[default]
    Webp,
    Jpg,
    Png,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Webp => "image/webp",
            OutputFormat::Jpg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webp" => Ok(OutputFormat::Webp),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            other => Err(InputError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputFormat> for String {
    fn from(format: OutputFormat) -> Self {
        format.extension().to_string()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Output quality from 0 (lowest) to 100 (best)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct OutputQuality(u8);

impl OutputQuality {
    pub const MAX: OutputQuality = OutputQuality(100);

    pub fn new(value: i64) -> Result<Self, InputError> {
        if (0..=100).contains(&value) {
            Ok(OutputQuality(value as u8))
        } else {
            Err(InputError::QualityOutOfRange(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for OutputQuality {
    fn default() -> Self {
        OutputQuality(80)
    }
}

impl TryFrom<i64> for OutputQuality {
    type Error = InputError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        OutputQuality::new(value)
    }
}

impl From<OutputQuality> for i64 {
    fn from(quality: OutputQuality) -> Self {
        quality.0 as i64
    }
}

impl FromStr for OutputQuality {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| InputError::QualityOutOfRange(-1))?;
        OutputQuality::new(value)
    }
}

impl fmt::Display for OutputQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One prediction request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    /// Subject image
    #[serde(default)]
    pub subject_image: Option<ImageSource>,

    /// Optional background image
    #[serde(default)]
    pub background_image: Option<ImageSource>,

    /// Optional light mask
    #[serde(default)]
    pub light_image: Option<ImageSource>,

    /// Things you do not want to see in the image
    #[serde(default)]
    pub negative_prompt: String,

    #[serde(default)]
    pub output_format: OutputFormat,

    #[serde(default)]
    pub output_quality: OutputQuality,

    /// Random when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PredictionInput {
    pub fn image(&self, slot: ImageSlot) -> Option<&ImageSource> {
        match slot {
            ImageSlot::Subject => self.subject_image.as_ref(),
            ImageSlot::Background => self.background_image.as_ref(),
            ImageSlot::Light => self.light_image.as_ref(),
        }
    }

    pub fn with_image(mut self, slot: ImageSlot, source: ImageSource) -> Self {
        match slot {
            ImageSlot::Subject => self.subject_image = Some(source),
            ImageSlot::Background => self.background_image = Some(source),
            ImageSlot::Light => self.light_image = Some(source),
        }
        self
    }
}
