// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Session reconciler: the per-cycle driver.
//!
//! One reconciler instance exclusively owns the fault cache for the duration
//! of a cycle; there is no cross-session concurrency and no lock held between
//! sessions. A cycle is a best-effort sweep, not a transaction: every step
//! isolates per-node and per-job failures to warnings, and the snapshot
//! write-back is always attempted even when earlier steps partially failed.
//!
//! The session timestamp is injected by the embedding scheduler; no component
//! below this reads the clock, which keeps the stale-window and grace-delete
//! watchdog logic a pure wall-clock comparison against stored timestamps.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::budget::{charge_restart, ensure_budget, record_restart, reconcile_budgets};
use crate::cache::FaultCache;
use crate::classify::{can_restart, classify_job, classify_node};
use crate::cluster::{ClusterView, ConfigStore, JobRecord, PodDeleter, SessionHandle};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{FaultJob, NodeRankOccurrence, RescheduleMode};
use crate::policy::deletion::execute_deletions;
use crate::policy::{advance_pending, effective_tier, eligible_tasks, is_master_fault};
use crate::snapshot;
use crate::Result;

/// What one cycle did, for the embedding scheduler's bookkeeping and logs.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    /// Cached fault nodes to mark onto the live node view so downstream
    /// placement sees them.
    pub fault_nodes: Vec<String>,
    /// `(job_uid, task_uid)` pairs whose eviction was issued this cycle.
    pub deleted_tasks: Vec<(String, String)>,
    /// Jobs dropped from cache after exceeding the stale-wait window.
    pub dropped_jobs: Vec<String>,
    /// Jobs confirmed fully restarted and released this cycle.
    pub restarted_jobs: Vec<String>,
    /// Per-step failures that were logged and skipped.
    pub step_errors: u32,
}

/// Per-cycle driver over the cached fault state.
pub struct SessionReconciler {
    cache: FaultCache,
    config: EngineConfig,
    store: Arc<dyn ConfigStore>,
    deleter: Arc<dyn PodDeleter>,
}

impl SessionReconciler {
    pub fn new(
        cache: FaultCache,
        config: EngineConfig,
        store: Arc<dyn ConfigStore>,
        deleter: Arc<dyn PodDeleter>,
    ) -> Self {
        Self {
            cache,
            config,
            store,
            deleter,
        }
    }

    /// Reconstruct the cache from the persisted snapshot at scheduler
    /// startup. A missing object or an undecodable kind starts empty.
    pub async fn load(
        config: EngineConfig,
        store: Arc<dyn ConfigStore>,
        deleter: Arc<dyn PodDeleter>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        let cache = match store.load(&config.snapshot_name).await {
            Ok(Some(entries)) => snapshot::decode(&entries),
            Ok(None) => FaultCache::new(),
            Err(e) => {
                warn!(error = %e, "failed to read persisted snapshot, starting empty");
                FaultCache::new()
            }
        };
        Ok(Self::new(cache, config, store, deleter))
    }

    pub fn cache(&self) -> &FaultCache {
        &self.cache
    }

    /// Run one scheduling session against a live cluster view.
    pub async fn run_session(
        &mut self,
        view: &ClusterView,
        session: &dyn SessionHandle,
        now: i64,
    ) -> SessionOutcome {
        let mut outcome = SessionOutcome::default();

        self.sync_nodes(view, now);
        outcome.fault_nodes = self.cache.fault_node_names();

        // Jobs already cached before this session; a job admitted below is
        // fully classified on admission and must not be reconciled twice.
        let known: Vec<String> = self.cache.jobs.keys().cloned().collect();
        self.admit_new_jobs(view, now);
        self.reconcile_cached_jobs(view, &known, now, &mut outcome);
        self.escalate_and_delete(view, session, now, &mut outcome).await;

        reconcile_budgets(&mut self.cache.budgets, &view.jobs);

        // Always attempt the write-back, even after partial failures.
        let entries = snapshot::encode(&mut self.cache, &self.config);
        if let Err(e) = self.store.merge(&self.config.snapshot_name, entries).await {
            let err = EngineError::Store(e);
            warn!(error = %err, "snapshot write-back failed, will retry next session");
            outcome.step_errors += 1;
        }

        debug!(
            fault_nodes = outcome.fault_nodes.len(),
            deleted = outcome.deleted_tasks.len(),
            dropped = outcome.dropped_jobs.len(),
            "session complete"
        );
        outcome
    }

    /// Step (1): merge live nodes into the cache. Nodes absent from this
    /// session are retained untouched.
    fn sync_nodes(&mut self, view: &ClusterView, now: i64) {
        for record in view.nodes.values() {
            let prior = self.cache.nodes.get(&record.name);
            let was_fault = prior.map(|n| n.is_fault_node).unwrap_or(false);
            let node = classify_node(record, prior, &self.config, now);
            if node.is_fault_node && !was_fault {
                info!(
                    node = %node.node_name,
                    state = %node.node_health_state,
                    "node entered fault state"
                );
            }
            self.cache.nodes.insert(record.name.clone(), node);
        }
    }

    /// Step (3): create fault entries for jobs this session sees for the
    /// first time.
    fn admit_new_jobs(&mut self, view: &ClusterView, now: i64) {
        for live in view.jobs.values() {
            if self
                .cache
                .resolve_job(&live.uid, &live.namespace, &live.reference_name)
                .is_some()
            {
                continue;
            }
            let budget = self.cache.budgets.get(&live.uid);
            let mut job = classify_job(live, None, &self.cache.nodes, budget, &self.config, now);
            job.uses_superpod = job_spans_superpod(&job, view);
            if job.is_fault_job {
                job.is_master_fault = is_master_fault(&job, &self.config, &view.node_superpod);
                ensure_budget(&mut self.cache.budgets, &job);
                info!(
                    job = %job.job_name,
                    kinds = ?job.fault_kinds,
                    "job entered fault state"
                );
            }
            self.cache.jobs.insert(job.job_uid.clone(), job);
        }
    }

    /// Step (4): reconcile every previously-cached job against the live view.
    fn reconcile_cached_jobs(
        &mut self,
        view: &ClusterView,
        cached: &[String],
        now: i64,
        outcome: &mut SessionOutcome,
    ) {
        for uid in cached {
            let Some(job) = self.cache.jobs.get(uid) else {
                continue;
            };
            let live = view
                .jobs
                .get(uid)
                .or_else(|| find_by_reference(view, &job.namespace, &job.reference_name));

            let Some(live) = live else {
                // Absent from the session; keep it until the wait window runs
                // out in case the controller brings it back.
                if now - job.updated_at > self.config.max_wait_secs {
                    info!(job = %job.job_name, "job absent past wait window, releasing");
                    self.cache.forget_job(uid);
                    outcome.dropped_jobs.push(uid.clone());
                }
                continue;
            };

            if job.fault_since > 0 && now - job.fault_since > self.config.max_wait_secs {
                info!(job = %job.job_name, "fault episode exceeded wait window, releasing");
                self.cache.forget_job(uid);
                outcome.dropped_jobs.push(uid.clone());
                continue;
            }

            self.refresh_job(uid, live, view, now, outcome);
        }
    }

    fn refresh_job(
        &mut self,
        cached_uid: &str,
        live: &JobRecord,
        view: &ClusterView,
        now: i64,
        outcome: &mut SessionOutcome,
    ) {
        let prior = self.cache.jobs.get(cached_uid).cloned();
        let Some(prior) = prior else { return };
        let budget = self.cache.budgets.get(&live.uid);
        let mut job = classify_job(live, Some(&prior), &self.cache.nodes, budget, &self.config, now);
        job.uses_superpod = prior.uses_superpod || job_spans_superpod(&job, view);

        // Confirmed fully restarted: eviction ran, the job is back at
        // strength, and nothing is fault any more.
        if prior.delete_executed && !job.is_fault_job && live.allocated_count() >= live.min_available
        {
            info!(job = %job.job_name, "restart confirmed, releasing job");
            self.cache.forget_job(cached_uid);
            outcome.restarted_jobs.push(live.uid.clone());
            return;
        }

        if job.is_fault_job || prior.delete_executed {
            if job.reschedule_mode != RescheduleMode::Off {
                job.pending_session_num = advance_pending(
                    prior.pending_session_num,
                    live.is_process_recovery(),
                    live.recovery_failed(),
                    &self.config,
                );
            }
            job.is_master_fault = is_master_fault(&job, &self.config, &view.node_superpod);
            ensure_budget(&mut self.cache.budgets, &job);
        }

        if job.delete_executed {
            self.check_rank_reuse(cached_uid, &job);
        }

        // Elastic UID change: re-key the cache entry and its bookkeeping.
        if live.uid != cached_uid {
            debug!(
                job = %job.job_name,
                old_uid = %cached_uid,
                new_uid = %live.uid,
                "job UID changed, re-keying cache entry"
            );
            self.cache.jobs.remove(cached_uid);
            self.cache.budgets.remove(cached_uid);
            if let Some(occurrences) = self.cache.occurrences.remove(cached_uid) {
                self.cache.occurrences.insert(live.uid.clone(), occurrences);
            }
            if let Some(mut history) = self.cache.history.remove(cached_uid) {
                history.job_id = live.uid.clone();
                self.cache.history.insert(live.uid.clone(), history);
            }
        }
        self.cache.jobs.insert(live.uid.clone(), job);
    }

    /// A rank landing back on a node its fault history pinned is illegal
    /// re-use; the admission predicate should have vetoed it.
    fn check_rank_reuse(&self, job_uid: &str, job: &FaultJob) {
        let Some(occurrences) = self.cache.occurrences.get(job_uid) else {
            return;
        };
        for task in &job.fault_tasks {
            if task.node_name.is_empty() {
                continue;
            }
            let illegal = occurrences.iter().any(|o| {
                o.is_fault && o.node_name == task.node_name && o.rank_index == task.node_rank_index
            });
            if illegal {
                warn!(
                    job = %job.job_name,
                    task = %task.task_name,
                    node = %task.node_name,
                    rank = task.node_rank_index,
                    "rank re-placed on a node its fault history excludes"
                );
            }
        }
    }

    /// Step (5): run the escalation engine over flagged jobs and execute
    /// deletions; step (6) bookkeeping follows for each executed job.
    async fn escalate_and_delete(
        &mut self,
        view: &ClusterView,
        session: &dyn SessionHandle,
        now: i64,
        outcome: &mut SessionOutcome,
    ) {
        let uids: Vec<String> = self.cache.jobs.keys().cloned().collect();
        for uid in uids {
            let eligible: BTreeSet<String> = {
                let Some(job) = self.cache.jobs.get(&uid) else {
                    continue;
                };
                if !job.is_fault_job
                    || job.delete_executed
                    || job.reschedule_mode == RescheduleMode::Off
                {
                    continue;
                }
                if !can_restart(job, self.cache.budgets.get(&uid)) {
                    // Budget exhaustion is a policy outcome, not an error.
                    debug!(job = %job.job_name, "retry budget exhausted, restart blocked");
                    continue;
                }
                let tier = effective_tier(job, &self.config, &view.node_superpod);
                eligible_tasks(job, tier, &self.config, &view.node_superpod)
            };
            let Some(live) = view.jobs.get(&uid) else {
                continue;
            };

            // Take ownership for the mutable deletion pass, then put it back.
            let Some(mut job) = self.cache.jobs.remove(&uid) else {
                continue;
            };
            let deletion = execute_deletions(
                &mut job,
                live,
                &eligible,
                session,
                self.deleter.as_ref(),
                &self.config,
                now,
            )
            .await;

            outcome
                .deleted_tasks
                .extend(deletion.deleted.iter().map(|t| (uid.clone(), t.clone())));
            outcome.step_errors += deletion.failed.len() as u32;

            if deletion.fully_executed() {
                job.delete_executed = true;
                job.delete_executed_at = now;
                self.cache
                    .occurrences
                    .insert(uid.clone(), occurrences_of(&job));
                charge_restart(&mut self.cache.budgets, &job);
                record_restart(&mut self.cache.history, &job, &self.config, now);
            }
            self.cache.jobs.insert(uid, job);
        }
    }
}

/// Wall-clock session timestamp, produced once per cycle at the scheduler
/// boundary. Everything below [`SessionReconciler::run_session`] compares
/// against stored timestamps and never reads the clock itself.
pub fn session_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Placement snapshot taken when a job's deletion has executed.
fn occurrences_of(job: &FaultJob) -> Vec<NodeRankOccurrence> {
    job.fault_tasks
        .iter()
        .filter(|t| !t.node_name.is_empty())
        .map(|t| NodeRankOccurrence {
            node_name: t.node_name.clone(),
            rank_index: t.node_rank_index,
            is_fault: t.is_fault_task,
        })
        .collect()
}

fn job_spans_superpod(job: &FaultJob, view: &ClusterView) -> bool {
    job.fault_tasks
        .iter()
        .any(|t| !t.node_name.is_empty() && view.node_superpod.contains_key(&t.node_name))
}

fn find_by_reference<'a>(
    view: &'a ClusterView,
    namespace: &str,
    reference: &str,
) -> Option<&'a JobRecord> {
    view.jobs
        .values()
        .find(|j| j.namespace == namespace && j.reference_name == reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{MemoryConfigStore, MemorySession, RecordingPodDeleter};

    #[tokio::test]
    async fn test_empty_view_still_writes_snapshot() {
        let store = Arc::new(MemoryConfigStore::new());
        let deleter = Arc::new(RecordingPodDeleter::new());
        let mut reconciler = SessionReconciler::new(
            FaultCache::new(),
            EngineConfig::default(),
            store.clone(),
            deleter,
        );

        let outcome = reconciler
            .run_session(&ClusterView::default(), &MemorySession::default(), 100)
            .await;
        assert_eq!(outcome.step_errors, 0);

        let snapshot = store.snapshot("resched-fault-snapshot").await.unwrap();
        assert!(snapshot.contains_key("fault-node-list"));
        assert!(snapshot.contains_key("integrity-check-code"));
    }

    #[tokio::test]
    async fn test_load_survives_missing_snapshot() {
        let store = Arc::new(MemoryConfigStore::new());
        let deleter = Arc::new(RecordingPodDeleter::new());
        let reconciler =
            SessionReconciler::load(EngineConfig::default(), store, deleter)
                .await
                .unwrap();
        assert!(reconciler.cache().nodes.is_empty());
    }
}
