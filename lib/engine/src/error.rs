// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Categorized error type for the rescheduling engine.
//!
//! Callers inspect the category to decide what to do with a failure, rather
//! than the error defining its own behavior: an [`EngineError::Decode`] means
//! "skip this snapshot kind for the cycle", an [`EngineError::Delete`] means
//! "the job stays un-executed and is retried next session". No category is
//! fatal to a scheduling cycle.

use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotKind;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Nil or invalid argument to an engine entry point; the operation is a
    /// no-op.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A persisted snapshot kind failed to decode; the stale or empty value is
    /// used for the cycle.
    #[error("failed to decode snapshot kind {kind}")]
    Decode {
        kind: SnapshotKind,
        #[source]
        source: serde_json::Error,
    },

    /// A single pod deletion failed; the owning job remains "not yet executed"
    /// and is retried next session.
    #[error("failed to delete pod {namespace}/{pod}")]
    Delete {
        namespace: String,
        pod: String,
        #[source]
        source: anyhow::Error,
    },

    /// The snapshot store rejected a read or write.
    #[error("config store operation failed: {0}")]
    Store(#[source] anyhow::Error),

    /// A cooperative eviction was rejected because the task is no longer
    /// present in the scheduler session.
    #[error("task {task} of job {job} not present in session")]
    Session { job: String, task: String },
}

impl EngineError {
    /// Category tag, stable across message wording changes.
    pub fn error_type(&self) -> ErrorType {
        match self {
            EngineError::InvalidInput(_) => ErrorType::InvalidInput,
            EngineError::Decode { .. } => ErrorType::Decode,
            EngineError::Delete { .. } => ErrorType::Delete,
            EngineError::Store(_) => ErrorType::Store,
            EngineError::Session { .. } => ErrorType::Session,
        }
    }
}

/// Fixed set of engine error categories, serializable for event reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    InvalidInput,
    Decode,
    Delete,
    Store,
    Session,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorType::InvalidInput => write!(f, "InvalidInput"),
            ErrorType::Decode => write!(f, "Decode"),
            ErrorType::Delete => write!(f, "Delete"),
            ErrorType::Store => write!(f, "Store"),
            ErrorType::Session => write!(f, "Session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time assertions that EngineError stays usable across task
    // boundaries. These fail at compile time if a future change breaks them.
    const _: () = {
        fn assert_stderror<T: std::error::Error>() {}
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        fn assert_all() {
            assert_stderror::<EngineError>();
            assert_send::<EngineError>();
            assert_sync::<EngineError>();
        }
    };

    #[test]
    fn test_error_type_mapping() {
        let err = EngineError::InvalidInput("nil view".to_string());
        assert_eq!(err.error_type(), ErrorType::InvalidInput);

        let err = EngineError::Session {
            job: "j".to_string(),
            task: "t".to_string(),
        };
        assert_eq!(err.error_type(), ErrorType::Session);
    }

    #[test]
    fn test_delete_error_carries_source() {
        use std::error::Error;

        let err = EngineError::Delete {
            namespace: "train".to_string(),
            pod: "worker-3".to_string(),
            source: anyhow::anyhow!("connection refused"),
        };
        assert!(err.to_string().contains("train/worker-3"));
        assert!(err.source().unwrap().to_string().contains("refused"));
    }
}
