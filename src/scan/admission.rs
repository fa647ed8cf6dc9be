// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Single-active-operation guard

use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::{Result, WardenError};

/// Admits at most one scan or mutating batch operation at a time.
///
/// Owned by the engine and cloned into the tasks it spawns; there is no
/// process-global flag.
#[derive(Debug, Clone, Default)]
pub struct Admission {
    active: Arc<Mutex<Option<String>>>,
}

impl Admission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-set under one lock. Rejects instead of queueing.
    pub fn try_acquire(&self, operation_id: &str) -> Result<OperationPermit> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            return Err(WardenError::ScanAlreadyRunning {
                active: current.clone(),
            });
        }
        *active = Some(operation_id.to_string());
        debug!("Admitted operation {}", operation_id);

        Ok(OperationPermit {
            active: Arc::clone(&self.active),
            id: operation_id.to_string(),
        })
    }
}

/// Releases the admission slot when dropped
#[derive(Debug)]
pub struct OperationPermit {
    active: Arc<Mutex<Option<String>>>,
    id: String,
}

impl OperationPermit {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `publish` and free the slot under the admission lock. Callers
    /// that see the published state and then try to acquire wait for the
    /// release; callers that find the slot free see the published state.
    pub fn release_with<F: FnOnce()>(self, publish: F) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        publish();
        if active.as_deref() == Some(self.id.as_str()) {
            *active = None;
            debug!("Released operation {}", self.id);
        }
    }
}

impl Drop for OperationPermit {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_deref() == Some(self.id.as_str()) {
            *active = None;
            debug!("Released operation {}", self.id);
        }
    }
}
