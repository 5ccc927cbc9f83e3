use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageFormat, RgbImage};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Detection, Detector};
use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::geometry::{Point, Polygon};

/// OCR service reached over HTTP.
///
/// The frame image is posted as a base64 PNG together with the language
/// hints; the service answers with polygons in the coordinates of the image
/// it received.
pub struct HttpDetector {
    client: Client,
    endpoint: String,
    languages: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    image: String,
    languages: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    regions: Vec<RegionPayload>,
}

#[derive(Debug, Deserialize)]
struct RegionPayload {
    polygon: Vec<[f64; 2]>,
    #[serde(default)]
    text: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

const fn default_confidence() -> f32 {
    1.0
}

impl HttpDetector {
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::DetectionRequest(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            languages: config.languages.clone(),
        })
    }

    fn encode_png(image: &RgbImage) -> Result<String> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| Error::DetectionRequest(format!("Failed to encode frame image: {e}")))?;
        Ok(BASE64.encode(bytes))
    }
}

#[async_trait]
impl Detector for HttpDetector {
    fn name(&self) -> &'static str {
        "HTTP OCR"
    }

    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let request = DetectRequest {
            image: Self::encode_png(image)?,
            languages: &self.languages,
        };

        debug!(
            "Detection request to {} ({}x{})",
            self.endpoint,
            image.width(),
            image.height()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::DetectionRequest("request timed out".to_string())
                } else {
                    Error::DetectionRequest(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            warn!("Detection service unavailable: {}", status);
            return Err(Error::DetectionRequest(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DetectionInvalidResponse(format!(
                "HTTP {status}: {}",
                crate::util::truncate_for_log(&body, 200)
            )));
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| Error::DetectionInvalidResponse(e.to_string()))?;

        Ok(parsed.regions.into_iter().map(RegionPayload::into_detection).collect())
    }
}

impl RegionPayload {
    fn into_detection(self) -> Detection {
        let polygon = Polygon::new(self.polygon.into_iter().map(|[x, y]| Point::new(x, y)).collect());
        Detection::new(polygon, self.text, self.confidence)
    }
}
