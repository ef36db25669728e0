//! Test module for server-fn-rpc
//!
//! Property-based and scenario tests that exercise several modules together:
//! middleware ordering, chain execution, the wire format and the static
//! result cache.

#[cfg(test)]
pub mod executor_tests;


#[cfg(test)]
pub mod flatten_tests;

#[cfg(test)]
pub mod server_fn_tests;
