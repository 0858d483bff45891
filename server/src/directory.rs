//! HTTP client for the external recipient directory.
//!
//! The directory is a collaborator, not part of this system: given a
//! targeting expression it returns concrete recipient ids. Outages are
//! surfaced as [`DirectoryError::Unavailable`] so targeting retries on the
//! next scheduler tick instead of failing the broadcast.

use herald_core::broadcast::TargetType;
use herald_core::directory::{DirectoryError, DirectoryFuture, RecipientDirectory};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest<'a> {
    target_type: TargetType,
    target_ids: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveResponse {
    recipient_ids: Vec<String>,
}

/// Directory client over `POST {base}/resolve`.
#[derive(Clone)]
pub struct HttpRecipientDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecipientDirectory {
    /// Build a client against the directory's base URL.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unavailable`] if the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl RecipientDirectory for HttpRecipientDirectory {
    fn resolve(
        &self,
        target_type: TargetType,
        target_ids: &[String],
    ) -> DirectoryFuture<'_, Vec<String>> {
        let target_ids: Vec<String> = target_ids.to_vec();
        Box::pin(async move {
            let url = format!("{}/resolve", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&ResolveRequest {
                    target_type,
                    target_ids: &target_ids,
                })
                .send()
                .await
                .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

            if response.status().is_client_error() {
                return Err(DirectoryError::Rejected(format!(
                    "directory returned {}",
                    response.status()
                )));
            }
            if !response.status().is_success() {
                return Err(DirectoryError::Unavailable(format!(
                    "directory returned {}",
                    response.status()
                )));
            }

            let body: ResolveResponse = response
                .json()
                .await
                .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
            Ok(body.recipient_ids)
        })
    }
}
