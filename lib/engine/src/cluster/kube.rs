// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes-backed collaborator implementations.
//!
//! The snapshot lives in a namespaced ConfigMap; merges patch only the keys
//! the engine owns, leaving foreign keys untouched. Pod deletion goes through
//! the API server with a UID precondition so a recreated pod of the same name
//! is never deleted by a stale decision.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::{
    api::{DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, Preconditions},
    Api, Client,
};
use tracing::debug;

use super::{ConfigStore, PodDeleter};
use crate::error::EngineError;
use crate::{ErrorContext, Result};

/// [`ConfigStore`] over a namespaced ConfigMap.
pub struct KubeConfigStore {
    api: Api<ConfigMap>,
}

impl KubeConfigStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    /// Connect with the ambient cluster configuration.
    pub async fn try_default(namespace: &str) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("failed to create Kubernetes client")?;
        Ok(Self::new(client, namespace))
    }
}

#[async_trait]
impl ConfigStore for KubeConfigStore {
    async fn load(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let cm = self
            .api
            .get_opt(name)
            .await
            .with_context(|| format!("failed to read config object {name}"))?;
        Ok(cm.and_then(|cm| cm.data))
    }

    async fn merge(&self, name: &str, entries: BTreeMap<String, String>) -> Result<()> {
        if self.api.get_opt(name).await?.is_none() {
            debug!(name, "snapshot object absent, creating");
            let cm = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                data: Some(entries),
                ..Default::default()
            };
            self.api
                .create(&PostParams::default(), &cm)
                .await
                .with_context(|| format!("failed to create config object {name}"))?;
            return Ok(());
        }

        // Strategic-merge on `data` replaces exactly the keys we own.
        let patch = serde_json::json!({ "data": entries });
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to merge config object {name}"))?;
        Ok(())
    }
}

/// [`PodDeleter`] over the API server.
pub struct KubePodDeleter {
    client: Client,
}

impl KubePodDeleter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodDeleter for KubePodDeleter {
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
        grace_period_secs: Option<i64>,
    ) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: grace_period_secs.map(|g| g.max(0) as u32),
            preconditions: uid.map(|uid| Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..Default::default()
        };
        match api.delete(name, &params).await {
            Ok(_) => Ok(()),
            // An already-gone pod is a completed deletion, not a failure.
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(namespace, pod = name, "pod already gone");
                Ok(())
            }
            Err(e) => Err(EngineError::Delete {
                namespace: namespace.to_string(),
                pod: name.to_string(),
                source: e.into(),
            }
            .into()),
        }
    }
}
