use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of per-login CSRF state values.
pub trait StateSource: Send + Sync {
    fn issue(&self) -> String;
}

/// Issues `"{counter}/{uuid-v4}"` state tokens.
///
/// The counter makes values from one issuer pairwise distinct; the random
/// half makes them unguessable and distinct across processes and restarts.
#[derive(Debug, Default)]
pub struct StateTokenIssuer {
    counter: AtomicU64,
}

impl StateTokenIssuer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateSource for StateTokenIssuer {
    fn issue(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{n}/{}", Uuid::new_v4())
    }
}
