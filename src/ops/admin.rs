//! Client for the coordinator's admin API

use crate::common::{encode_path_segment, Error, Result};
use crate::coordinator::http::{AddReplicasRequest, CreateFileRequest, ReplicaSpec};
use serde_json::Value;

pub struct AdminClient {
    base_url: String,
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            // Redirects name the metadata master and are reported, not followed
            http: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_default(),
        }
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.base_url, encode_path_segment(file_id))
    }

    pub async fn create_file(&self, request: &CreateFileRequest) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/files", self.base_url))
            .json(request)
            .send()
            .await;
        read_response(response).await
    }

    pub async fn show_file(&self, file_id: &str) -> Result<Value> {
        let response = self.http.get(self.file_url(file_id)).send().await;
        read_response(response).await
    }

    /// Blocks until the replica set change has been installed or abandoned
    pub async fn add_replicas(&self, file_id: &str, replicas: Vec<ReplicaSpec>) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/replicas", self.file_url(file_id)))
            .json(&AddReplicasRequest { replicas })
            .send()
            .await;
        read_response(response).await
    }

    /// Blocks until the replica set change has been installed or abandoned
    pub async fn remove_replica(&self, file_id: &str, osd_uuid: &str) -> Result<Value> {
        let response = self
            .http
            .delete(format!(
                "{}/replicas/{}",
                self.file_url(file_id),
                encode_path_segment(osd_uuid)
            ))
            .send()
            .await;
        read_response(response).await
    }

    pub async fn revalidate(&self, file_id: &str) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/revalidate", self.file_url(file_id)))
            .send()
            .await;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Result<reqwest::Response>) -> Result<Value> {
    let response = response.map_err(|e| Error::ConnectionFailed(e.to_string()))?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| Error::Other(format!("invalid response body: {}", e)))?;
    if status.is_success() {
        return Ok(body);
    }

    let message = body["message"].as_str().unwrap_or("request failed").to_string();
    Err(match status.as_u16() {
        403 => Error::PermissionDenied(message),
        404 => Error::NotFound(message),
        400 => Error::InvalidArgument(message),
        409 => Error::Busy(message),
        307 => Error::Redirect {
            target: body["redirect_to"].as_str().map(str::to_string),
        },
        _ => Error::Internal(message),
    })
}
