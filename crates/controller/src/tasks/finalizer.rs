//! Finalizer protocol and conflict-aware status writes.
//!
//! Every mutation here is a full read-modify-write cycle against the latest copy of
//! the object, written with its resourceVersion and retried on 409 Conflict through
//! [`retry_on_conflict`].

use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::tasks::retry::{retry_on_conflict, RetryConfig};
use crate::tasks::types::{is_not_found, Error, Result};

/// Read and write access to one resource kind
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Latest copy of the object, `None` when it does not exist
    async fn get(&self, name: &str) -> Result<Option<K>>;

    /// Write the whole object; fails with 409 when its resourceVersion is stale
    async fn replace(&self, name: &str, obj: &K) -> Result<K>;

    /// Write the status subresource; fails with 409 when its resourceVersion is stale
    async fn replace_status(&self, name: &str, obj: &K) -> Result<K>;
}

#[async_trait]
impl<K> ObjectStore<K> for Api<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<K>> {
        match Api::get(self, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, name: &str, obj: &K) -> Result<K> {
        Ok(Api::replace(self, name, &PostParams::default(), obj).await?)
    }

    async fn replace_status(&self, name: &str, obj: &K) -> Result<K> {
        let body = serde_json::to_vec(obj).map_err(kube::Error::SerdeError)?;
        Ok(Api::replace_status(self, name, &PostParams::default(), body).await?)
    }
}

fn object_name<K: Resource>(obj: &K) -> Result<String> {
    obj.meta().name.clone().ok_or(Error::MissingObjectKey)
}

fn gone(name: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{name} not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

#[must_use]
pub fn has_finalizer<K: Resource>(obj: &K, token: &str) -> bool {
    obj.finalizers().iter().any(|f| f == token)
}

/// Add `token` to the object's finalizers. A no-op when it is already present.
pub async fn add_finalizer<K>(
    store: &dyn ObjectStore<K>,
    retry: &RetryConfig,
    token: &str,
    obj: &K,
) -> Result<K>
where
    K: Resource + Clone + Send + Sync,
{
    if has_finalizer(obj, token) {
        return Ok(obj.clone());
    }

    let name = object_name(obj)?;
    let name = name.as_str();

    let updated = retry_on_conflict(retry, name, || async move {
        let mut latest = store.get(name).await?.ok_or_else(|| gone(name))?;
        if has_finalizer(&latest, token) {
            return Ok(latest);
        }
        latest.finalizers_mut().push(token.to_string());
        store.replace(name, &latest).await
    })
    .await?;

    info!(object = %name, finalizer = %token, "Added finalizer");
    Ok(updated)
}

/// Remove `token` from the object's finalizers.
///
/// Tolerates a token that is already absent and an object that is already gone.
pub async fn remove_finalizer<K>(
    store: &dyn ObjectStore<K>,
    retry: &RetryConfig,
    token: &str,
    obj: &K,
) -> Result<K>
where
    K: Resource + Clone + Send + Sync,
{
    let name = object_name(obj)?;
    let name = name.as_str();

    let updated = retry_on_conflict(retry, name, || async move {
        let Some(mut latest) = store.get(name).await? else {
            debug!(object = %name, "Object already gone, nothing to unblock");
            return Ok(obj.clone());
        };
        if !has_finalizer(&latest, token) {
            return Ok(latest);
        }
        latest.finalizers_mut().retain(|f| f != token);
        match store.replace(name, &latest).await {
            Err(Error::KubeError(e)) if is_not_found(&e) => Ok(latest),
            other => other,
        }
    })
    .await?;

    info!(object = %name, finalizer = %token, "Removed finalizer");
    Ok(updated)
}

/// Apply `mutate` to the latest copy of the object and write its status subresource.
///
/// `mutate` may run more than once when writes conflict.
pub async fn try_update_status<K, F>(
    store: &dyn ObjectStore<K>,
    retry: &RetryConfig,
    obj: &K,
    mutate: F,
) -> Result<K>
where
    K: Resource + Clone + Send + Sync,
    F: Fn(&mut K) + Send + Sync,
{
    let name = object_name(obj)?;
    let name = name.as_str();
    let mutate = &mutate;

    retry_on_conflict(retry, name, || async move {
        let mut latest = store.get(name).await?.ok_or_else(|| gone(name))?;
        mutate(&mut latest);
        store.replace_status(name, &latest).await
    })
    .await
}
