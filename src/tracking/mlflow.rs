//! MLflow REST API client (blocking)

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::model::{param_value_to_string, MetricSet, ParameterSet};
use crate::tracking::backend::{RunInfo, TrackingBackend};
use crate::tracking::error::TrackingError;

const API_PREFIX: &str = "api/2.0/mlflow";
const ARTIFACTS_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts";
const ARTIFACT_SCHEME: &str = "mlflow-artifacts:";
const DEFAULT_EXPERIMENT_ID: &str = "0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// log-batch limits enforced by the server
const MAX_PARAMS_PER_BATCH: usize = 100;
const MAX_TAGS_PER_BATCH: usize = 100;
const MAX_METRICS_PER_BATCH: usize = 1000;

#[derive(Debug, Serialize)]
struct KeyValue {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct MetricEntry {
    key: String,
    value: f64,
    timestamp: i64,
    step: i64,
}

#[derive(Debug, Default, Serialize)]
struct LogBatchRequest<'a> {
    run_id: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    metrics: Vec<MetricEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    params: Vec<KeyValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    experiment_id: &'a str,
    run_name: &'a str,
    start_time: i64,
    tags: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
struct UpdateRunRequest<'a> {
    run_id: &'a str,
    status: &'static str,
    end_time: i64,
}

#[derive(Debug, Serialize)]
struct CreateExperimentRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExperimentResponse {
    experiment: ExperimentInfo,
}

#[derive(Debug, Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    run: RunPayload,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    info: RunInfoPayload,
}

#[derive(Debug, Deserialize)]
struct RunInfoPayload {
    run_id: String,
    #[serde(default)]
    artifact_uri: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error_code: String,
}

/// [`TrackingBackend`] speaking the MLflow tracking server REST API
///
/// Artifacts are uploaded through the server's artifact proxy, so the server
/// must run with artifact serving enabled (the MLflow 2.x default).
pub struct MlflowClient {
    base_url: Option<String>,
    client: Client,
    experiment_id: String,
    run: Option<RunInfo>,
}

impl MlflowClient {
    pub fn new() -> Result<Self, TrackingError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("easy-experiment/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: None,
            client,
            experiment_id: DEFAULT_EXPERIMENT_ID.to_string(),
            run: None,
        })
    }

    fn base_url(&self) -> Result<&str, TrackingError> {
        self.base_url
            .as_deref()
            .ok_or_else(|| TrackingError::UnsupportedTrackingUri("<unset>".to_string()))
    }

    fn api_url(&self, endpoint: &str) -> Result<String, TrackingError> {
        Ok(format!("{}/{}/{}", self.base_url()?, API_PREFIX, endpoint))
    }

    fn active_run(&self) -> Result<&RunInfo, TrackingError> {
        self.run.as_ref().ok_or(TrackingError::NoActiveRun)
    }

    fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, TrackingError> {
        let response = self.client.post(self.api_url(endpoint)?).json(body).send()?;
        parse_json(check_status(response)?)
    }

    fn log_batch(&self, batch: LogBatchRequest<'_>) -> Result<(), TrackingError> {
        let _: serde_json::Value = self.post("runs/log-batch", &batch)?;
        Ok(())
    }

    fn upload(&self, path: &Path, artifact_path: Option<&str>) -> Result<(), TrackingError> {
        let run = self.active_run()?;
        let root = artifact_root(&run.artifact_uri)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TrackingError::UnsupportedPayload(path.display().to_string()))?;
        let url = artifact_url(self.base_url()?, &root, artifact_path, file_name)?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let body = fs::read(path)?;
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, mime.essence_str())
            .body(body)
            .send()?;
        check_status(response)?;

        tracing::debug!(
            file = %path.display(),
            artifact_path = artifact_path.unwrap_or(""),
            "Uploaded artifact"
        );
        Ok(())
    }
}

impl TrackingBackend for MlflowClient {
    fn set_tracking_uri(&mut self, uri: &str) -> Result<(), TrackingError> {
        let trimmed = uri.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(TrackingError::UnsupportedTrackingUri(uri.to_string()));
        }
        self.base_url = Some(trimmed.to_string());
        Ok(())
    }

    fn set_experiment(&mut self, name: &str) -> Result<(), TrackingError> {
        let response = self
            .client
            .get(self.api_url("experiments/get-by-name")?)
            .query(&[("experiment_name", name)])
            .send()?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().unwrap_or_default();
            let code = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error_code)
                .unwrap_or_default();
            if code != "RESOURCE_DOES_NOT_EXIST" {
                return Err(TrackingError::Http { status: 404, body });
            }
            let created: CreateExperimentResponse =
                self.post("experiments/create", &CreateExperimentRequest { name })?;
            tracing::info!(experiment = name, id = %created.experiment_id, "Created tracking experiment");
            self.experiment_id = created.experiment_id;
            return Ok(());
        }

        let found: ExperimentResponse = parse_json(check_status(response)?)?;
        self.experiment_id = found.experiment.experiment_id;
        Ok(())
    }

    fn start_run(&mut self, name: &str) -> Result<RunInfo, TrackingError> {
        let request = CreateRunRequest {
            experiment_id: &self.experiment_id,
            run_name: name,
            start_time: now_millis(),
            tags: vec![KeyValue {
                key: "mlflow.runName".to_string(),
                value: name.to_string(),
            }],
        };
        let response: RunResponse = self.post("runs/create", &request)?;
        let info = RunInfo {
            run_id: response.run.info.run_id,
            artifact_uri: response.run.info.artifact_uri,
        };
        self.run = Some(info.clone());
        Ok(info)
    }

    fn end_run(&mut self) -> Result<(), TrackingError> {
        let run_id = self.active_run()?.run_id.clone();
        let request = UpdateRunRequest {
            run_id: &run_id,
            status: "FINISHED",
            end_time: now_millis(),
        };
        let _: serde_json::Value = self.post("runs/update", &request)?;
        self.run = None;
        Ok(())
    }

    fn set_tags(&mut self, tags: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        let run_id = self.active_run()?.run_id.clone();
        let entries: Vec<KeyValue> = tags
            .iter()
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        for chunk in chunked(entries, MAX_TAGS_PER_BATCH) {
            self.log_batch(LogBatchRequest {
                run_id: &run_id,
                tags: chunk,
                ..Default::default()
            })?;
        }
        Ok(())
    }

    fn log_params(&mut self, params: &ParameterSet) -> Result<(), TrackingError> {
        let run_id = self.active_run()?.run_id.clone();
        for chunk in chunked(params_to_entries(params), MAX_PARAMS_PER_BATCH) {
            self.log_batch(LogBatchRequest {
                run_id: &run_id,
                params: chunk,
                ..Default::default()
            })?;
        }
        Ok(())
    }

    fn log_metrics(
        &mut self,
        metrics: &MetricSet,
        step: Option<i64>,
    ) -> Result<(), TrackingError> {
        let run_id = self.active_run()?.run_id.clone();
        let timestamp = now_millis();
        let entries: Vec<MetricEntry> = metrics
            .iter()
            .map(|(k, v)| MetricEntry {
                key: k.clone(),
                value: *v,
                timestamp,
                step: step.unwrap_or(0),
            })
            .collect();
        for chunk in chunked(entries, MAX_METRICS_PER_BATCH) {
            self.log_batch(LogBatchRequest {
                run_id: &run_id,
                metrics: chunk,
                ..Default::default()
            })?;
        }
        Ok(())
    }

    fn log_artifact(
        &mut self,
        path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError> {
        self.upload(path, artifact_path)
    }

    fn log_artifacts(
        &mut self,
        dir: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError> {
        self.active_run()?;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative_parent = entry
                .path()
                .strip_prefix(dir)
                .ok()
                .and_then(|p| p.parent())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .filter(|p| !p.is_empty());
            let target = join_artifact_path(artifact_path, relative_parent.as_deref());
            self.upload(entry.path(), target.as_deref())?;
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn check_status(response: Response) -> Result<Response, TrackingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(TrackingError::Http {
        status: status.as_u16(),
        body,
    })
}

fn parse_json<R: DeserializeOwned>(response: Response) -> Result<R, TrackingError> {
    let text = response.text()?;
    let text = if text.trim().is_empty() { "{}" } else { &text };
    serde_json::from_str(text).map_err(|e| TrackingError::Response(e.to_string()))
}

fn params_to_entries(params: &ParameterSet) -> Vec<KeyValue> {
    params
        .iter()
        .map(|(k, v)| KeyValue {
            key: k.clone(),
            value: param_value_to_string(v),
        })
        .collect()
}

fn chunked<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::new();
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

/// Path of a run's artifact root inside the artifact proxy
///
/// Accepts `mlflow-artifacts:/<path>` and `mlflow-artifacts://<authority>/<path>`.
fn artifact_root(artifact_uri: &str) -> Result<String, TrackingError> {
    let rest = artifact_uri
        .strip_prefix(ARTIFACT_SCHEME)
        .ok_or_else(|| TrackingError::UnsupportedArtifactStore(artifact_uri.to_string()))?;
    let path = match rest.strip_prefix("//") {
        Some(with_authority) => with_authority
            .split_once('/')
            .map(|(_, path)| path)
            .unwrap_or(""),
        None => rest,
    };
    Ok(path.trim_matches('/').to_string())
}

fn join_artifact_path(base: Option<&str>, child: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [base, child]
        .into_iter()
        .flatten()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Upload URL for a file in the artifact proxy, one percent-encoded segment per path part
fn artifact_url(
    base_url: &str,
    root: &str,
    artifact_path: Option<&str>,
    file_name: &str,
) -> Result<Url, TrackingError> {
    let invalid = || TrackingError::UnsupportedTrackingUri(base_url.to_string());
    let mut url = Url::parse(base_url).map_err(|_| invalid())?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| invalid())?;
        segments.pop_if_empty();
        segments.extend(ARTIFACTS_PREFIX.split('/'));
        for part in [Some(root), artifact_path].into_iter().flatten() {
            segments.extend(part.split('/').filter(|s| !s.is_empty()));
        }
        segments.push(file_name);
    }
    Ok(url)
}
