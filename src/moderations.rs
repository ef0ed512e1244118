//! Moderation checks (`moderations`).

use std::{collections::BTreeMap, sync::Arc};

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientInner,
    errors::Result,
    http::{RequestOptions, ResponseMetadata},
    types::impl_api_response,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationRequest {
    pub input: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl ModerationRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            model: None,
        }
    }
}

/// Per-input verdict. Category names are kept as sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,
    #[serde(default)]
    pub categories: BTreeMap<String, bool>,
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,
}

impl ModerationResult {
    /// Names of the categories that were flagged.
    pub fn flagged_categories(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .filter(|(_, flagged)| **flagged)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub results: Vec<ModerationResult>,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl ModerationResponse {
    pub fn flagged(&self) -> bool {
        self.results.iter().any(|r| r.flagged)
    }
}

impl_api_response!(ModerationResponse);

#[derive(Clone)]
pub struct ModerationsClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ModerationsClient {
    pub async fn create(
        &self,
        req: ModerationRequest,
        options: RequestOptions,
    ) -> Result<ModerationResponse> {
        self.inner
            .execute(Method::POST, "moderations", Some(&req), &options)
            .await
    }
}
