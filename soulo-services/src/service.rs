//! Service trait and lifecycle management.
//!
//! All services implement the `Service` trait which provides a standard
//! lifecycle (init, shutdown) and health checking interface. Services are
//! shared behind `Arc` by the request handlers, so lifecycle state lives in
//! a [`StateCell`] rather than behind `&mut self`.

use std::sync::atomic::{AtomicU8, Ordering};

use soulo_core::error::SouloResult;

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    Created,
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
    /// Fatal; `init` or `shutdown` returned an error.
    Failed,
}

impl ServiceState {
    const ALL: [ServiceState; 6] = [
        Self::Created,
        Self::Initializing,
        Self::Running,
        Self::ShuttingDown,
        Self::Stopped,
        Self::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state shared across threads; services are held behind `Arc`.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ServiceState::Created as u8))
    }

    pub fn get(&self) -> ServiceState {
        let raw = self.0.load(Ordering::Acquire) as usize;
        ServiceState::ALL.get(raw).copied().unwrap_or(ServiceState::Failed)
    }

    pub fn set(&self, state: ServiceState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle hooks driven by the [`ServiceRegistry`](crate::ServiceRegistry)
/// in registration order (reverse order on shutdown).
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ServiceState;

    fn init(&self) -> SouloResult<()>;

    fn shutdown(&self) -> SouloResult<()>;

    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}
