//! Global middleware registry
//!
//! Middleware registered here run before the middleware of every server
//! function. Registration happens once at startup: the first chain
//! execution seals the registry and later registrations fail with
//! `REGISTRY_LOCKED`.

use crate::error::{RpcError, RpcResult};
use crate::middleware::Middleware;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock};

static GLOBAL: OnceLock<MiddlewareRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn global() -> &'static MiddlewareRegistry {
    GLOBAL.get_or_init(MiddlewareRegistry::new)
}

/// Append middleware to the process-wide registry.
///
/// # Errors
/// `REGISTRY_LOCKED` once any server function has executed.
pub fn register_global_middleware(middlewares: Vec<Middleware>) -> RpcResult<()> {
    global().register(middlewares)
}

/// Append-only list of middleware prepended to every chain.
#[derive(Debug, Default)]
pub struct MiddlewareRegistry {
    middlewares: RwLock<Vec<Middleware>>,
    sealed: AtomicBool,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append middleware unless the registry is sealed.
    pub fn register(&self, middlewares: Vec<Middleware>) -> RpcResult<()> {
        let mut guard = self
            .middlewares
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.sealed.load(Ordering::Acquire) {
            tracing::warn!(
                count = middlewares.len(),
                "Rejected late global middleware registration"
            );
            return Err(RpcError::registry_locked());
        }
        tracing::debug!(count = middlewares.len(), "Registered global middleware");
        guard.extend(middlewares);
        Ok(())
    }

    /// Seal the registry and return its middleware.
    pub fn seal(&self) -> Vec<Middleware> {
        let guard = self
            .middlewares
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.sealed.store(true, Ordering::Release);
        guard.clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Registered middleware, without sealing.
    pub fn snapshot(&self) -> Vec<Middleware> {
        self.middlewares
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.middlewares
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcErrorCode;
    use crate::middleware::create_middleware;

    #[test]
    fn test_register_then_seal() {
        let registry = MiddlewareRegistry::new();
        let mw = create_middleware();
        registry.register(vec![mw.clone()]).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_sealed());

        assert_eq!(registry.seal(), vec![mw]);
        assert!(registry.is_sealed());
    }

    #[test]
    fn test_register_after_seal_fails() {
        let registry = MiddlewareRegistry::new();
        registry.seal();
        let err = registry.register(vec![create_middleware()]).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::RegistryLocked);
        assert!(registry.is_empty());
    }
}
