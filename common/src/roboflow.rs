use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::detection::{keep_best, BoundingBox, Detection, Detections};
use crate::dispatch::{DetectError, Detector};
use crate::frame::Frame;

/// Client for a Roboflow-style hosted detection model.
///
/// The frame goes out as a base64 JPEG form body; the response carries
/// centre-based boxes which are reduced to the best box per label.
#[derive(Clone)]
pub struct RoboflowClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    confidence: f32,
    labels: Vec<String>,
    jpeg_quality: u8,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    class: String,
}

impl RoboflowClient {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectError> {
        Self::for_model(config, &config.model, config.version, config.labels.clone())
    }

    /// Same endpoint and credentials, different hosted model and labels.
    pub fn for_model(
        config: &DetectorConfig,
        model: &str,
        version: u32,
        labels: Vec<String>,
    ) -> Result<Self, DetectError> {
        // No request timeout: a slow call just keeps the dispatcher busy.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/{}/{}", config.endpoint.trim_end_matches('/'), model, version),
            api_key: config.api_key.clone(),
            confidence: config.confidence,
            labels: labels.into_iter().map(|l| l.to_lowercase()).collect(),
            jpeg_quality: config.jpeg_quality,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Best detection per wanted label.
    pub async fn infer(&self, frame: &Frame) -> Result<Detections, DetectError> {
        let mut best = Detections::new();
        for (label, detection) in self.predictions(frame).await? {
            keep_best(&mut best, &label, detection);
        }
        debug!(seq = frame.seq, found = best.len(), "detector response");
        Ok(best)
    }

    /// Every prediction for a wanted label, as corner boxes, in response order.
    pub async fn predictions(&self, frame: &Frame) -> Result<Vec<(String, Detection)>, DetectError> {
        let jpeg = frame.to_jpeg(self.jpeg_quality)?;
        let body = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        // The hosted API takes confidence as a percentage.
        let confidence = ((self.confidence * 100.0).round() as i64).to_string();

        let response = self
            .client
            .post(&self.url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("confidence", confidence.as_str()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let parsed: InferResponse =
            serde_json::from_str(&text).map_err(|e| DetectError::Response(e.to_string()))?;
        Ok(self.wanted(parsed.predictions))
    }

    fn wanted(&self, predictions: Vec<Prediction>) -> Vec<(String, Detection)> {
        predictions
            .into_iter()
            .filter_map(|p| {
                let label = p.class.to_lowercase();
                if !self.labels.is_empty() && !self.labels.contains(&label) {
                    return None;
                }
                let detection = Detection {
                    bbox: BoundingBox::from_center(p.x, p.y, p.width, p.height),
                    confidence: p.confidence,
                };
                Some((label, detection))
            })
            .collect()
    }
}

impl Detector for RoboflowClient {
    type Output = Detections;

    async fn detect(&self, frame: Frame) -> Result<Detections, DetectError> {
        self.infer(&frame).await
    }

    fn name(&self) -> &str {
        "roboflow"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::solid_frame;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn spawn_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/:model/:version",
            post(
                |Path((model, version)): Path<(String, u32)>,
                 Query(query): Query<HashMap<String, String>>,
                 body: String| async move {
                    if query.get("api_key").map(String::as_str) != Some("key") {
                        return (StatusCode::FORBIDDEN, Json(serde_json::json!({}))).into_response();
                    }
                    if model == "down" {
                        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
                    }
                    if model == "garbled" {
                        return (StatusCode::OK, "not json").into_response();
                    }
                    let decoded = base64::engine::general_purpose::STANDARD.decode(body.trim());
                    assert!(decoded.map(|b| b.starts_with(&[0xFF, 0xD8])).unwrap_or(false));
                    assert_eq!(version, 3);
                    assert_eq!(query.get("confidence").map(String::as_str), Some("40"));
                    Json(serde_json::json!({
                        "predictions": [
                            {"x": 30.0, "y": 30.0, "width": 40.0, "height": 40.0, "confidence": 0.87, "class": "tie"},
                            {"x": 35.0, "y": 30.0, "width": 10.0, "height": 10.0, "confidence": 0.41, "class": "tie"},
                            {"x": 100.0, "y": 200.0, "width": 80.0, "height": 20.0, "confidence": 0.66, "class": "Belt"},
                            {"x": 5.0, "y": 5.0, "width": 2.0, "height": 2.0, "confidence": 0.99, "class": "shoe"}
                        ]
                    }))
                    .into_response()
                },
            ),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(endpoint: String, model: &str) -> DetectorConfig {
        DetectorConfig {
            endpoint,
            model: model.into(),
            version: 3,
            api_key: "key".into(),
            ..DetectorConfig::default()
        }
    }

    #[tokio::test]
    async fn keeps_best_box_per_wanted_label() {
        let base = spawn_server().await;
        let client = RoboflowClient::new(&config(base, "uniform")).unwrap();
        let detections = client.detect(solid_frame(64, 64, 1)).await.unwrap();

        assert_eq!(detections.len(), 2);
        let tie = detections["tie"];
        assert_eq!(tie.bbox, BoundingBox::new(10, 10, 50, 50));
        assert!((tie.confidence - 0.87).abs() < 1e-6);
        assert_eq!(detections["belt"].bbox, BoundingBox::new(60, 190, 140, 210));
        assert!(!detections.contains_key("shoe"));
    }

    #[tokio::test]
    async fn empty_label_list_keeps_everything() {
        let base = spawn_server().await;
        let mut cfg = config(base, "uniform");
        cfg.labels.clear();
        let client = RoboflowClient::new(&cfg).unwrap();
        let detections = client.detect(solid_frame(64, 64, 1)).await.unwrap();
        assert_eq!(detections.len(), 3);
        assert!(detections.contains_key("shoe"));
    }

    #[tokio::test]
    async fn http_error_is_reported_with_status() {
        let base = spawn_server().await;
        let client = RoboflowClient::new(&config(base, "down")).unwrap();
        let err = client.detect(solid_frame(8, 8, 1)).await.unwrap_err();
        match err {
            DetectError::HttpStatus { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bad_api_key_is_an_error() {
        let base = spawn_server().await;
        let mut cfg = config(base, "uniform");
        cfg.api_key = "wrong".into();
        let client = RoboflowClient::new(&cfg).unwrap();
        let err = client.detect(solid_frame(8, 8, 1)).await.unwrap_err();
        assert!(matches!(err, DetectError::HttpStatus { status: 403, .. }));
    }

    #[tokio::test]
    async fn non_json_body_is_response_error() {
        let base = spawn_server().await;
        let client = RoboflowClient::new(&config(base, "garbled")).unwrap();
        let err = client.detect(solid_frame(8, 8, 1)).await.unwrap_err();
        assert!(matches!(err, DetectError::Response(_)));
    }

    #[tokio::test]
    async fn predictions_keep_every_wanted_box() {
        let base = spawn_server().await;
        let client = RoboflowClient::new(&config(base, "uniform")).unwrap();
        let all = client.predictions(&solid_frame(64, 64, 1)).await.unwrap();
        let labels: Vec<&str> = all.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["tie", "tie", "belt"]);
        assert_eq!(all[1].1.bbox, BoundingBox::new(30, 25, 40, 35));
    }

    #[test]
    fn url_joins_endpoint_model_and_version() {
        let cfg = config("https://detect.example.com/".into(), "uniform");
        let client = RoboflowClient::new(&cfg).unwrap();
        assert_eq!(client.url(), "https://detect.example.com/uniform/3");
    }
}
