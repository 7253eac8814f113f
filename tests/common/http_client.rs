//! Thin `reqwest` client for the gateway routes.

use reqwest::StatusCode;
use serde_json::{Value, json};

use tmsync::TmId;

pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn read(response: reqwest::Response) -> anyhow::Result<(StatusCode, Value)> {
        let status = response.status();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, body))
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<(StatusCode, Value)> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        Self::read(response).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> anyhow::Result<(StatusCode, Value)> {
        let mut request = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        Self::read(request.send().await?).await
    }

    pub async fn create_tm(&self, name: &str) -> anyhow::Result<TmId> {
        let (status, body) = self
            .post(
                "/tm",
                Some(json!({"name": name, "source_lang": "en", "target_lang": "fr"})),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::CREATED, "create_tm returned {status}: {body}");
        body["id"]
            .as_i64()
            .ok_or_else(|| anyhow::anyhow!("create_tm response without id: {body}"))
    }

    pub async fn bulk_insert(&self, tm_id: TmId, pairs: &[(&str, &str)]) -> anyhow::Result<Value> {
        let entries: Vec<Value> = pairs
            .iter()
            .map(|(source, target)| json!({"source": source, "target": target}))
            .collect();
        let (status, body) = self
            .post(
                &format!("/tm/{tm_id}/entries/bulk"),
                Some(json!({ "entries": entries })),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::CREATED, "bulk insert returned {status}: {body}");
        Ok(body)
    }

    pub async fn tm_status(&self, tm_id: TmId) -> anyhow::Result<Value> {
        let (status, body) = self.get(&format!("/tm/{tm_id}")).await?;
        anyhow::ensure!(status == StatusCode::OK, "tm status returned {status}: {body}");
        Ok(body)
    }

    pub async fn suggest(
        &self,
        tm_id: TmId,
        source: &str,
        threshold: f32,
        max_results: i64,
    ) -> anyhow::Result<(StatusCode, Value)> {
        let response = self
            .client
            .get(format!("{}/tm/suggest", self.base_url))
            .query(&[
                ("source", source.to_string()),
                ("threshold", threshold.to_string()),
                ("max_results", max_results.to_string()),
                ("tm_id", tm_id.to_string()),
            ])
            .send()
            .await?;
        Self::read(response).await
    }
}
