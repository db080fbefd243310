use shared::types::Scope;
use tokio_util::sync::CancellationToken;
use crate::error::{RegistryError, RegistryResult};

/// Per-call tenant scope plus the caller's cancellation signal.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub scope: Scope,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(scope: Scope, cancel: CancellationToken) -> Self {
        Self { scope, cancel }
    }

    /// Context that is never canceled.
    #[cfg(test)]
    pub fn detached(scope: Scope) -> Self {
        Self::new(scope, CancellationToken::new())
    }

    /// Called before every write; a canceled caller never reaches the datasource.
    pub fn ensure_active(&self) -> RegistryResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::Canceled);
        }
        Ok(())
    }
}
