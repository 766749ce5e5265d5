//! Active operation bookkeeping.
//!
//! # Responsibilities
//! - Register every call before dispatch under a unique id
//! - Remove it when the call ends, on every exit path
//! - Expose snapshots and best-effort cancellation
//!
//! # Design Decisions
//! - Removal is tied to a RAII guard, so panics and early returns cannot leak entries
//! - Cancellation only drops the bookkeeping entry; running work is not interrupted
//! - Ids combine the name, a nanosecond timestamp and a process-wide sequence

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;

use crate::observability::metrics;
use crate::resilience::error::ContextMap;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// An in-flight call.
#[derive(Debug, Clone)]
pub struct ActiveOperation {
    pub operation_id: String,
    pub name: String,
    pub started_at: SystemTime,
    pub timeout_secs: f64,
    pub context: ContextMap,
    started: Instant,
}

impl ActiveOperation {
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn snapshot(&self) -> ActiveOperationSnapshot {
        let elapsed_secs = self.elapsed_secs();
        ActiveOperationSnapshot {
            operation_id: self.operation_id.clone(),
            name: self.name.clone(),
            started_at_unix_secs: self
                .started_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            timeout_secs: self.timeout_secs,
            context: self.context.clone(),
            elapsed_secs,
            timeout_remaining: (self.timeout_secs - elapsed_secs).max(0.0),
        }
    }
}

/// Point-in-time view of an active operation.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveOperationSnapshot {
    pub operation_id: String,
    pub name: String,
    pub started_at_unix_secs: f64,
    pub timeout_secs: f64,
    pub context: ContextMap,
    pub elapsed_secs: f64,
    pub timeout_remaining: f64,
}

/// Registry of in-flight calls, shared by the async and sync paths.
#[derive(Debug, Default)]
pub struct ActiveOperationRegistry {
    operations: Arc<DashMap<String, ActiveOperation>>,
}

impl ActiveOperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call. The entry lives until the guard drops or it is cancelled.
    pub fn register(
        &self,
        name: &str,
        timeout_secs: f64,
        context: ContextMap,
    ) -> ActiveOperationGuard {
        let operation_id = next_operation_id(name);
        self.operations.insert(
            operation_id.clone(),
            ActiveOperation {
                operation_id: operation_id.clone(),
                name: name.to_string(),
                started_at: SystemTime::now(),
                timeout_secs,
                context,
                started: Instant::now(),
            },
        );

        ActiveOperationGuard {
            operations: Arc::clone(&self.operations),
            operation_id,
        }
    }

    /// Snapshot of every active call, keyed by id.
    pub fn snapshot(&self) -> HashMap<String, ActiveOperationSnapshot> {
        self.operations
            .iter()
            .map(|r| (r.key().clone(), r.value().snapshot()))
            .collect()
    }

    pub fn contains(&self, operation_id: &str) -> bool {
        self.operations.contains_key(operation_id)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Best-effort cancellation: forget the entry, report whether it existed.
    ///
    /// The underlying work keeps running; only the bookkeeping goes away.
    pub fn cancel(&self, operation_id: &str) -> bool {
        match self.operations.remove(operation_id) {
            Some((_, op)) => {
                tracing::info!(
                    operation = %op.name,
                    operation_id = %operation_id,
                    elapsed_secs = op.elapsed_secs(),
                    "Operation marked cancelled"
                );
                metrics::record_cancellation();
                true
            }
            None => false,
        }
    }
}

/// A RAII guard that removes the registry entry on drop.
#[derive(Debug)]
pub struct ActiveOperationGuard {
    operations: Arc<DashMap<String, ActiveOperation>>,
    operation_id: String,
}

impl ActiveOperationGuard {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }
}

impl Drop for ActiveOperationGuard {
    fn drop(&mut self) {
        self.operations.remove(&self.operation_id);
    }
}

fn next_operation_id(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{name}_{nanos}_{seq}")
}
