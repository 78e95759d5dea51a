use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::SyncSettings;
use crate::models::sync::{InsightRecord, SyncError, SyncPayload, SyncSummary};
use crate::services::token_provider::{Credential, TokenProvider};
use crate::utils::guardrails::apply_guardrails;

const UPLOAD_PATH: &str = "sync/upload";
const INSIGHTS_PATH: &str = "insights/generate";

/// Talks to the remote sync/insight service. Every call is a single attempt;
/// the only resend is the one that follows a credential refresh.
#[derive(Clone)]
pub struct SyncClient {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    tokens: Arc<dyn TokenProvider>,
    timeout: Duration,
    max_insights: usize,
}

impl SyncClient {
    pub fn new(settings: &SyncSettings, tokens: Arc<dyn TokenProvider>) -> Result<Self, SyncError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| SyncError::Config(format!("base_url {:?}: {}", settings.base_url, e)))?;
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key.clone(),
            tokens,
            timeout: settings.timeout(),
            max_insights: settings.max_insights,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    #[tracing::instrument(
        name = "Upload sync payload",
        skip(self, payload, cancel),
        fields(
            log_entries = payload.cached_log_entries.len(),
            glucose_samples = payload.health_snapshot.glucose_samples.len()
        )
    )]
    pub async fn upload(
        &self,
        payload: &SyncPayload,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let summary: SyncSummary = self.post_authorized(UPLOAD_PATH, payload, cancel).await?;

        if !summary.errors.is_empty() {
            tracing::warn!("Sync service reported {} item errors", summary.errors.len());
        }
        tracing::info!(
            "Upload accepted: {} glucose, {} workouts, {} nutrition",
            summary.glucose_readings,
            summary.workouts,
            summary.nutrition_entries
        );
        Ok(summary)
    }

    #[tracing::instrument(name = "Generate insights", skip(self, payload, cancel))]
    pub async fn generate_insights(
        &self,
        payload: &SyncPayload,
        cancel: &CancellationToken,
    ) -> Result<Vec<InsightRecord>, SyncError> {
        let mut insights: Vec<InsightRecord> =
            self.post_authorized(INSIGHTS_PATH, payload, cancel).await?;

        if insights.len() > self.max_insights {
            tracing::debug!(
                "Keeping {} of {} insights",
                self.max_insights,
                insights.len()
            );
            insights.truncate(self.max_insights);
        }
        insights.iter_mut().for_each(apply_guardrails);

        tracing::info!("Received {} insights", insights.len());
        Ok(insights)
    }

    /// Sends with the current credential. An absent or expired credential, or a
    /// 401, leads to exactly one refresh; a second rejection is terminal.
    async fn post_authorized<B, T>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, SyncError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let mut refreshed = false;
        let mut credential = match self.tokens.current_token().await {
            Some(credential) if !credential.is_expired() => credential,
            _ => {
                tracing::info!("No valid credential cached; refreshing before {}", path);
                refreshed = true;
                self.refresh_credential(cancel).await?
            }
        };

        loop {
            match self.send(path, body, &credential, cancel).await {
                Err(SyncError::AuthenticationExpired) if !refreshed => {
                    tracing::info!("Credential rejected by {}; refreshing once", path);
                    refreshed = true;
                    credential = self.refresh_credential(cancel).await?;
                }
                result => return result,
            }
        }
    }

    async fn refresh_credential(&self, cancel: &CancellationToken) -> Result<Credential, SyncError> {
        let refreshed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = self.tokens.refresh() => result,
        };

        refreshed.map_err(|e| {
            tracing::warn!("Token refresh failed: {}", e);
            SyncError::AuthenticationExpired
        })
    }

    async fn send<B, T>(
        &self,
        path: &str,
        body: &B,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<T, SyncError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        tracing::debug!("Calling sync service at {}", url);

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(credential.expose())
            .json(body)
            .timeout(self.timeout);
        if let Some(api_key) = &self.api_key {
            request = request.header("X-API-Key", api_key.expose_secret());
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = request.send() => result.map_err(SyncError::from_transport)?,
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::AuthenticationExpired);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Sync service returned error {}: {}", status, error_text);
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited,
                _ => SyncError::ServerError {
                    status: status.as_u16(),
                    body: error_text,
                },
            });
        }

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = response.bytes() => result.map_err(SyncError::from_transport)?,
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::error!("Undecodable response from {}: {}", url, e);
            SyncError::InvalidResponse(e.to_string())
        })
    }
}
