// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory collaborator implementations, used by the test suites the same
//! way the production paths use the kube-backed ones.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ConfigStore, PodDeleter, SessionHandle};
use crate::error::EngineError;
use crate::Result;

/// Map-backed [`ConfigStore`] honoring the merge-on-update contract.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    objects: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of one object, for assertions.
    pub async fn snapshot(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.objects.lock().await.get(name).cloned()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.objects.lock().await.get(name).cloned())
    }

    async fn merge(&self, name: &str, entries: BTreeMap<String, String>) -> Result<()> {
        let mut objects = self.objects.lock().await;
        objects.entry(name.to_string()).or_default().extend(entries);
        Ok(())
    }
}

/// One recorded pod deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedPod {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub grace_period_secs: Option<i64>,
}

/// [`PodDeleter`] that records every call and can be told to fail for
/// specific pods.
#[derive(Debug, Default)]
pub struct RecordingPodDeleter {
    deleted: Mutex<Vec<DeletedPod>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingPodDeleter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deleted(&self) -> Vec<DeletedPod> {
        self.deleted.lock().await.clone()
    }

    /// Make future deletions of this pod name fail.
    pub async fn fail_pod(&self, name: &str) {
        self.failing.lock().await.insert(name.to_string());
    }
}

#[async_trait]
impl PodDeleter for RecordingPodDeleter {
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
        grace_period_secs: Option<i64>,
    ) -> Result<()> {
        if self.failing.lock().await.contains(name) {
            return Err(EngineError::Delete {
                namespace: namespace.to_string(),
                pod: name.to_string(),
                source: crate::error!("injected failure"),
            }
            .into());
        }
        self.deleted.lock().await.push(DeletedPod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: uid.map(str::to_string),
            grace_period_secs,
        });
        Ok(())
    }
}

/// [`SessionHandle`] over a fixed set of in-session tasks. Evicting a task
/// not present fails, mirroring the cooperative-delete contract.
#[derive(Debug, Default)]
pub struct MemorySession {
    present: Mutex<HashSet<(String, String)>>,
    evicted: Mutex<Vec<(String, String)>>,
}

impl MemorySession {
    pub fn with_tasks(job_uid: &str, task_uids: &[&str]) -> Self {
        let present = task_uids
            .iter()
            .map(|t| (job_uid.to_string(), t.to_string()))
            .collect();
        Self {
            present: Mutex::new(present),
            evicted: Mutex::default(),
        }
    }

    pub async fn evicted(&self) -> Vec<(String, String)> {
        self.evicted.lock().await.clone()
    }
}

#[async_trait]
impl SessionHandle for MemorySession {
    async fn evict_task(&self, job_uid: &str, task_uid: &str, _reason: &str) -> Result<()> {
        let key = (job_uid.to_string(), task_uid.to_string());
        if !self.present.lock().await.contains(&key) {
            return Err(EngineError::Session {
                job: job_uid.to_string(),
                task: task_uid.to_string(),
            }
            .into());
        }
        self.evicted.lock().await.push(key);
        Ok(())
    }
}
