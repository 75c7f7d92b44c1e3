use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Criterion, EventId, Judge, JudgeId, ScoreRecord, Team, TeamId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{AssignmentsResponse, UpsertScoreResponse},
};
use url::Url;

use crate::ScoringService;

/// [`ScoringService`] backed by the scoring server's JSON API.
#[derive(Debug, Clone)]
pub struct HttpScoringService {
    http: Client,
    base: Url,
}

impl HttpScoringService {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self> {
        let base = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("server url '{server_url}' cannot carry a path"));
        }
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Appends percent-encoded path segments to the base url.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("server url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .context("failed to decode server response");
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(ApiException::from(api_error).into()),
        Err(_) => Err(anyhow!("server returned {status}: {body}")),
    }
}

#[async_trait]
impl ScoringService for HttpScoringService {
    async fn resolve_judge_by_token(&self, token: &str) -> Result<Option<Judge>> {
        let mut url = self.endpoint(&["judges", "resolve"])?;
        url.query_pairs_mut().append_pair("token", token);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("judge lookup request failed")?;
        if response.status() != StatusCode::NOT_FOUND {
            return decode(response).await.map(Some);
        }
        // A bare 404 means a wrong server url, not an unknown token.
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiError>(&body) {
            Ok(api_error) if api_error.code == ErrorCode::NotFound => Ok(None),
            _ => Err(anyhow!("judge lookup endpoint not found: {body}")),
        }
    }

    async fn assignments_for_judge(&self, judge_id: &JudgeId) -> Result<BTreeSet<TeamId>> {
        let body: AssignmentsResponse = self
            .get_json(&["judges", judge_id.as_str(), "assignments"])
            .await?;
        Ok(body.team_ids.into_iter().collect())
    }

    async fn teams_for_event(&self, event_id: &EventId) -> Result<Vec<Team>> {
        self.get_json(&["events", event_id.as_str(), "teams"]).await
    }

    async fn criteria_for_event(&self, event_id: &EventId) -> Result<Vec<Criterion>> {
        self.get_json(&["events", event_id.as_str(), "criteria"])
            .await
    }

    async fn scores_for_judge(&self, judge_id: &JudgeId) -> Result<Vec<ScoreRecord>> {
        self.get_json(&["judges", judge_id.as_str(), "scores"])
            .await
    }

    async fn upsert_score(&self, record: ScoreRecord) -> Result<()> {
        let url = self.endpoint(&["scores"])?;
        let response = self
            .http
            .put(url)
            .json(&record)
            .send()
            .await
            .with_context(|| format!("score upload for team {} failed", record.team_id))?;
        let _: UpsertScoreResponse = decode(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
