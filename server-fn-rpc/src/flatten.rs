//! Middleware flattening
//!
//! Expands nested middleware into one linear sequence: depth-first, each
//! middleware's nested list before the middleware itself, first occurrence
//! kept.

use crate::error::{RpcError, RpcResult};
use crate::middleware::{Middleware, MiddlewareId};
use std::collections::HashSet;

/// Nesting depth allowed by [`flatten`].
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Flatten `middlewares` with the default depth limit.
pub fn flatten(middlewares: &[Middleware]) -> RpcResult<Vec<Middleware>> {
    flatten_with_limit(middlewares, DEFAULT_MAX_DEPTH)
}

/// Flatten `middlewares`, failing with `MIDDLEWARE_CYCLE_DETECTED` when a
/// middleware nests itself or nesting exceeds `max_depth`.
pub fn flatten_with_limit(
    middlewares: &[Middleware],
    max_depth: usize,
) -> RpcResult<Vec<Middleware>> {
    let mut walker = Walker {
        seen: HashSet::new(),
        ancestors: Vec::new(),
        out: Vec::new(),
        max_depth,
    };
    walker.visit_all(middlewares)?;
    Ok(walker.out)
}

struct Walker {
    seen: HashSet<MiddlewareId>,
    ancestors: Vec<MiddlewareId>,
    out: Vec<Middleware>,
    max_depth: usize,
}

impl Walker {
    fn visit_all(&mut self, middlewares: &[Middleware]) -> RpcResult<()> {
        for middleware in middlewares {
            self.visit(middleware)?;
        }
        Ok(())
    }

    fn visit(&mut self, middleware: &Middleware) -> RpcResult<()> {
        let id = middleware.id();
        if self.ancestors.contains(&id) {
            return Err(RpcError::middleware_cycle(format!(
                "Middleware {} nests itself",
                id
            )));
        }
        if self.seen.contains(&id) {
            return Ok(());
        }
        if self.ancestors.len() >= self.max_depth {
            return Err(RpcError::middleware_cycle(format!(
                "Middleware nesting exceeds {} levels at {}",
                self.max_depth, id
            )));
        }

        self.ancestors.push(id);
        let nested = self.visit_all(middleware.nested());
        self.ancestors.pop();
        nested?;

        if self.seen.insert(id) {
            self.out.push(middleware.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcErrorCode;
    use crate::middleware::create_middleware;

    fn ids(list: &[Middleware]) -> Vec<MiddlewareId> {
        list.iter().map(Middleware::id).collect()
    }

    #[test]
    fn test_nested_before_parent() {
        let a = create_middleware().label("a");
        let b = create_middleware().label("b").middleware(vec![a.clone()]);
        let c = create_middleware().label("c");

        let flat = flatten(&[b.clone(), c.clone()]).unwrap();
        assert_eq!(ids(&flat), vec![a.id(), b.id(), c.id()]);
    }

    #[test]
    fn test_shared_middleware_runs_once() {
        let shared = create_middleware().label("shared");
        let left = create_middleware().middleware(vec![shared.clone()]);
        let right = create_middleware().middleware(vec![shared.clone()]);

        let flat = flatten(&[left.clone(), right.clone(), shared.clone()]).unwrap();
        assert_eq!(ids(&flat), vec![shared.id(), left.id(), right.id()]);
    }

    #[test]
    fn test_empty_list() {
        assert!(flatten(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let mut mw = create_middleware();
        for _ in 0..5 {
            mw = create_middleware().middleware(vec![mw]);
        }

        assert_eq!(flatten_with_limit(&[mw.clone()], 6).unwrap().len(), 6);
        let err = flatten_with_limit(&[mw], 3).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::MiddlewareCycleDetected);
    }
}
