//! Best-effort sync of the enrolled student into the Sheety spreadsheet API.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::profile::StudentProfile;
use eduvision_common::config::SheetyConfig;

#[derive(Debug, thiserror::Error)]
pub enum SheetyError {
    #[error("Sheety request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sheety {method} returned HTTP {status}: {body}")]
    Status {
        method: &'static str,
        status: u16,
        body: String,
    },
    #[error("unexpected Sheety response: {0}")]
    Response(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Created,
    Updated { row_id: i64 },
    /// A matching row exists but carries no id, so it cannot be updated.
    SkippedNoId,
}

pub struct SheetyClient {
    client: reqwest::Client,
    url: String,
    token: String,
    default_points: i64,
}

impl SheetyClient {
    pub fn new(config: &SheetyConfig) -> Result<Self, SheetyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/{}", config.base_url.trim_end_matches('/'), config.sheet),
            token: config.token.clone(),
            default_points: config.default_points,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.header(reqwest::header::AUTHORIZATION, &self.token)
        }
    }

    /// Create the student's row, or update class and gender on the existing
    /// one while keeping its remaining points.
    pub async fn sync_student(&self, profile: &StudentProfile) -> Result<SyncOutcome, SheetyError> {
        let rows = self.fetch_rows().await?;
        let wanted = profile.name.to_lowercase();
        let existing = rows.iter().find(|row| {
            row.get("name")
                .and_then(Value::as_str)
                .map(|n| n.trim().to_lowercase() == wanted)
                .unwrap_or(false)
        });

        match existing {
            None => {
                info!(name = profile.name, "adding student to sheet");
                let payload = self.payload(profile, json!(self.default_points));
                let request = self.authorize(self.client.post(&self.url)).json(&payload);
                self.send("POST", request).await?;
                Ok(SyncOutcome::Created)
            }
            Some(row) => {
                let Some(row_id) = row.get("id").and_then(row_id) else {
                    warn!(name = profile.name, "sheet row has no id, cannot update");
                    return Ok(SyncOutcome::SkippedNoId);
                };
                let points = match row.get("pointsLeft") {
                    Some(v) if !v.is_null() => v.clone(),
                    _ => json!(self.default_points),
                };
                info!(name = profile.name, row_id, "updating student in sheet");
                let payload = self.payload(profile, points);
                let url = format!("{}/{}", self.url, row_id);
                let request = self.authorize(self.client.put(url)).json(&payload);
                self.send("PUT", request).await?;
                Ok(SyncOutcome::Updated { row_id })
            }
        }
    }

    async fn fetch_rows(&self) -> Result<Vec<Value>, SheetyError> {
        let response = self.authorize(self.client.get(&self.url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetyError::Status {
                method: "GET",
                status: status.as_u16(),
                body,
            });
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| SheetyError::Response(e.to_string()))?;
        let rows = ["studentData", "studentdata"]
            .iter()
            .filter_map(|key| data.get(*key).and_then(Value::as_array))
            .find(|rows| !rows.is_empty())
            .cloned()
            .unwrap_or_default();
        debug!(rows = rows.len(), "fetched sheet rows");
        Ok(rows)
    }

    fn payload(&self, profile: &StudentProfile, points: Value) -> Value {
        json!({
            "studentdatum": {
                "name": profile.name,
                "class": profile.class,
                "gender": profile.gender,
                "pointsLeft": points,
            }
        })
    }

    async fn send(&self, method: &'static str, request: reqwest::RequestBuilder) -> Result<(), SheetyError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        if status != 200 && status != 201 {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetyError::Status { method, status, body });
        }
        Ok(())
    }
}

/// Sheety ids are numbers, occasionally numeric strings.
fn row_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
