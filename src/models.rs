//! Models API client (`models`).

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientInner,
    errors::{Error, Result, ValidationError},
    http::{RequestOptions, ResponseMetadata},
    types::{DeletedResponse, ListResponse, impl_api_response},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: String,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl_api_response!(Model);

/// Client for model operations.
#[derive(Clone)]
pub struct ModelsClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ModelsClient {
    pub async fn list(&self, options: RequestOptions) -> Result<ListResponse<Model>> {
        self.inner
            .execute(Method::GET, "models", None::<&()>, &options)
            .await
    }

    pub async fn retrieve(&self, id: &str, options: RequestOptions) -> Result<Model> {
        let resource = model_resource(id)?;
        self.inner
            .execute(Method::GET, &resource, None::<&()>, &options)
            .await
    }

    /// Delete a fine-tuned model the caller owns.
    ///
    /// A 401 or 403 surfaces as [`Error::Unauthorized`]. With `verify_exists`
    /// the model is fetched first, which costs one extra round trip but turns a
    /// missing model into a `RequestFailed` (404) before anything is mutated.
    pub async fn delete_fine_tuned_model(
        &self,
        id: &str,
        verify_exists: bool,
        options: RequestOptions,
    ) -> Result<DeletedResponse> {
        let resource = model_resource(id)?;
        if verify_exists {
            self.inner
                .execute::<(), Model>(Method::GET, &resource, None, &options)
                .await
                .map_err(Error::into_unauthorized)?;
        }
        self.inner
            .execute(Method::DELETE, &resource, None::<&()>, &options)
            .await
            .map_err(Error::into_unauthorized)
    }
}

fn model_resource(id: &str) -> Result<String> {
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::Validation(
            ValidationError::new("model id is required").with_field("id"),
        ));
    }
    Ok(format!("models/{id}"))
}
