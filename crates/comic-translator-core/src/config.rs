use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::preprocess::PreprocessOptions;

/// Language codes following ISO 639-1 with regional variants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lang(pub String);

impl Lang {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the source language should be detected by the backend.
    pub fn is_auto(&self) -> bool {
        self.0.eq_ignore_ascii_case("auto")
    }
}

// Serde default functions for the common comic direction (English -> French)
fn default_source_lang() -> Lang {
    Lang::new("en")
}

fn default_target_lang() -> Lang {
    Lang::new("fr")
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Lang {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Lang {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Color for lettered text
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl TextColor {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn black() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub const fn white() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    pub const fn dark_red() -> Self {
        Self::new(0.8, 0.0, 0.0)
    }

    pub const fn blue() -> Self {
        Self::new(0.0, 0.0, 0.8)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "black" => Some(Self::black()),
            "white" => Some(Self::white()),
            "darkred" | "dark_red" | "dark-red" => Some(Self::dark_red()),
            "blue" => Some(Self::blue()),
            _ => None,
        }
    }

    /// Convert to RGB bytes (0-255)
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_rgb_bytes(&self) -> (u8, u8, u8) {
        // Values are clamped to 0.0-1.0 range, so conversion is safe
        (
            (self.r.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.g.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.b.clamp(0.0, 1.0) * 255.0).round() as u8,
        )
    }
}

impl Default for TextColor {
    fn default() -> Self {
        Self::black()
    }
}

/// Inner margins of a region, as a fraction of its width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub horizontal: f32,
    pub vertical: f32,
}

impl Margins {
    pub const fn new(horizontal: f32, vertical: f32) -> Self {
        Self { horizontal, vertical }
    }
}

impl Default for Margins {
    fn default() -> Self {
        Self::new(0.10, 0.10)
    }
}

// =============================================================================
// Detection
// =============================================================================

/// How OCR lines are grouped into regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// One region per OCR line
    Off,
    /// Cluster lines that stack vertically
    Lines,
    /// Group lines by the speech bubble around them, clustering the rest
    #[default]
    Bubbles,
}

/// Detection (OCR) backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Endpoint of the OCR service (`POST` with a base64 PNG)
    #[serde(default = "default_detection_endpoint")]
    pub endpoint: String,
    /// OCR language hints passed to the service
    #[serde(default = "default_detection_languages")]
    pub languages: Vec<String>,
    /// Drop detections below this confidence
    #[serde(default)]
    pub min_confidence: f32,
    /// Grouping of OCR lines into speech blocks
    #[serde(default)]
    pub merge: MergeMode,
    /// Request timeout in seconds
    #[serde(default = "default_detection_timeout")]
    pub timeout_seconds: u64,
}

fn default_detection_endpoint() -> String {
    "http://localhost:8866/ocr".to_string()
}

fn default_detection_languages() -> Vec<String> {
    vec!["en".to_string()]
}

const fn default_detection_timeout() -> u64 {
    120
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detection_endpoint(),
            languages: default_detection_languages(),
            min_confidence: 0.0,
            merge: MergeMode::default(),
            timeout_seconds: default_detection_timeout(),
        }
    }
}

// =============================================================================
// Translator
// =============================================================================

/// Translation backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslatorProvider {
    /// Any OpenAI-compatible chat completions API (llama.cpp, Ollama, OpenAI...)
    #[default]
    OpenAi,
    /// DeepL REST API
    DeepL,
}

/// Translator backend configuration.
///
/// The API key is supplied by the caller (environment or secret store). It is
/// never serialized back out and is redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default)]
    pub provider: TranslatorProvider,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl TranslatorConfig {
    /// Create a new translator config
    pub fn new(
        provider: TranslatorProvider,
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            api_base: api_base.into(),
            api_key,
            model: model.into(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl fmt::Debug for TranslatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatorConfig")
            .field("provider", &self.provider)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("retry_count", &self.retry_count)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

fn default_api_base() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_model() -> String {
    "default_model".to_string()
}

const fn default_retry_count() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            provider: TranslatorProvider::default(),
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable memory cache
    #[serde(default = "default_true")]
    pub memory_enabled: bool,

    /// Maximum memory cache size in MiB of translated text
    #[serde(default = "default_memory_max_mb")]
    pub memory_max_mb: u64,

    /// Memory cache TTL in seconds (0 = no expiry)
    #[serde(default)]
    pub memory_ttl_seconds: u64,

    /// Enable disk cache
    #[serde(default = "default_true")]
    pub disk_enabled: bool,

    /// Disk cache directory (defaults to $XDG_CACHE_HOME/comic-translator)
    pub disk_path: Option<PathBuf>,
}

const fn default_true() -> bool {
    true
}

const fn default_memory_max_mb() -> u64 {
    16
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_enabled: true,
            memory_max_mb: default_memory_max_mb(),
            memory_ttl_seconds: 0,
            disk_enabled: true,
            disk_path: None,
        }
    }
}

// =============================================================================
// Render
// =============================================================================

/// Erasure and lettering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Extra pixels erased around each region polygon
    #[serde(default = "default_erase_padding")]
    pub erase_padding: u32,
    /// Inner margins of each region
    #[serde(default)]
    pub margins: Margins,
    /// Text color
    #[serde(default)]
    pub text_color: TextColor,
    #[serde(default = "default_min_font_size")]
    pub min_font_size: f32,
    #[serde(default = "default_max_font_size")]
    pub max_font_size: f32,
    /// Line height as a multiple of the font's natural line height
    #[serde(default = "default_line_spacing")]
    pub line_spacing: f32,
    /// Font file; falls back to a system font when absent
    #[serde(default)]
    pub font_path: Option<PathBuf>,
}

const fn default_erase_padding() -> u32 {
    2
}

const fn default_min_font_size() -> f32 {
    8.0
}

const fn default_max_font_size() -> f32 {
    100.0
}

const fn default_line_spacing() -> f32 {
    1.2
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            erase_padding: default_erase_padding(),
            margins: Margins::default(),
            text_color: TextColor::default(),
            min_font_size: default_min_font_size(),
            max_font_size: default_max_font_size(),
            line_spacing: default_line_spacing(),
            font_path: None,
        }
    }
}

// =============================================================================
// Pipeline / Export
// =============================================================================

/// Chapter scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pages processed at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Concurrent translation requests per page
    #[serde(default = "default_translate_concurrency")]
    pub translate_concurrency: usize,
    /// Directory for erased/rendered artifacts (defaults to `<output>/.work`)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

const fn default_concurrency() -> usize {
    2
}

const fn default_translate_concurrency() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            translate_concurrency: default_translate_concurrency(),
            work_dir: None,
        }
    }
}

/// Image format for exported pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportImageFormat {
    #[default]
    Png,
    Jpg,
}

impl ExportImageFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub image_format: ExportImageFormat,
    /// Write one combined PDF for the chapter
    #[serde(default = "default_true")]
    pub create_pdf: bool,
    /// JPEG quality for exported JPGs and PDF pages
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

const fn default_jpeg_quality() -> u8 {
    90
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            image_format: ExportImageFormat::default(),
            create_pdf: true,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

// =============================================================================
// Application
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source language
    #[serde(default = "default_source_lang")]
    pub source_lang: Lang,

    /// Target language
    #[serde(default = "default_target_lang")]
    pub target_lang: Lang,

    /// Processing-frame preprocessing
    #[serde(default)]
    pub preprocess: PreprocessOptions,

    /// Detection backend
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Translator backend configuration
    #[serde(default)]
    pub translator: TranslatorConfig,

    /// Backend tried when the primary translator fails
    #[serde(default)]
    pub fallback: Option<TranslatorConfig>,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Erasure and lettering
    #[serde(default)]
    pub render: RenderConfig,

    /// Scheduling
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Export
    #[serde(default)]
    pub export: ExportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
            preprocess: PreprocessOptions::default(),
            detection: DetectionConfig::default(),
            translator: TranslatorConfig::default(),
            fallback: None,
            cache: CacheConfig::default(),
            render: RenderConfig::default(),
            pipeline: PipelineConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::error::Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::error::Error::ConfigLoad(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::Error::ConfigLoad(format!("Failed to parse config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations (~/.config/comic-translator/config.toml,
    /// ./config.toml) layered with `COMIC_TRANSLATOR__*` environment variables.
    pub fn load() -> Self {
        let mut builder = config::Config::builder();

        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join(crate::util::APP_DIR_NAME).join("config.toml");
            builder = builder.add_source(config::File::from(user_config).required(false));
        }

        builder = builder
            .add_source(config::File::from(PathBuf::from("config.toml")).required(false))
            .add_source(
                config::Environment::with_prefix("COMIC_TRANSLATOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let loaded = builder
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| crate::error::Error::ConfigLoad(e.to_string()))
            .and_then(|c| c.validate().map(|()| c));

        match loaded {
            Ok(config) => {
                tracing::debug!("Loaded layered configuration");
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load configuration, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        let invalid = |field: &str, reason: &str| crate::error::Error::ConfigInvalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.pipeline.concurrency == 0 {
            return Err(invalid("pipeline.concurrency", "must be at least 1"));
        }
        if self.pipeline.translate_concurrency == 0 {
            return Err(invalid("pipeline.translate_concurrency", "must be at least 1"));
        }
        if self.render.min_font_size <= 0.0 || self.render.max_font_size < self.render.min_font_size {
            return Err(invalid("render.font_size", "need 0 < min_font_size <= max_font_size"));
        }
        let m = self.render.margins;
        if !(0.0..0.5).contains(&m.horizontal) || !(0.0..0.5).contains(&m.vertical) {
            return Err(invalid("render.margins", "fractions must be in [0, 0.5)"));
        }
        if self.preprocess.fit.max_width == Some(0) || self.preprocess.fit.max_height == Some(0) {
            return Err(invalid("preprocess.fit", "bounds must be positive"));
        }
        Ok(())
    }
}
