//! Bound on concurrently running CGI processes.
//!
//! # Design Decisions
//! - Backed by a fair (FIFO) Tokio semaphore
//! - The slot lives in an RAII token, so every exit path releases it,
//!   including panics and cancelled futures

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cgi::error::GatewayError;
use crate::observability::metrics;

/// Counting gate of fixed capacity.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until a slot is free and take it.
    pub async fn acquire(&self) -> Result<AdmissionToken, GatewayError> {
        let started = Instant::now();
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::AdmissionClosed)?;
        metrics::record_admission_wait(started);

        tracing::trace!(
            available = self.slots.available_permits(),
            capacity = self.capacity,
            "Admission slot acquired"
        );
        Ok(AdmissionToken { _permit: permit })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<AdmissionToken> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionToken { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One admission slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionToken {
    /// Give the slot back explicitly.
    pub fn release(self) {}
}
