//! Configuration for server functions.
//!
//! This module provides the [`ServerFnConfig`] struct shared by the client
//! builder, the server handler and the static result cache.
//!
//! # Example
//! ```rust,ignore
//! use server_fn_rpc::{RuntimeEnv, ServerFnConfig};
//!
//! let config = ServerFnConfig::new()
//!     .with_server_fn_base("/api/_server")
//!     .with_environment(RuntimeEnv::Production)
//!     .with_static_cache_dir("dist/public");
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding [`ServerFnConfig::server_fn_base`].
pub const ENV_SERVER_FN_BASE: &str = "TSS_SERVER_FN_BASE";
/// Environment variable overriding [`ServerFnConfig::static_cache_dir`].
pub const ENV_OUTPUT_PUBLIC_DIR: &str = "TSS_OUTPUT_PUBLIC_DIR";
/// Environment variable selecting [`RuntimeEnv`] (`production` or anything else).
pub const ENV_RUNTIME: &str = "TSS_ENV";

/// Whether the process runs a development or a production build.
///
/// Static server functions only consult the precomputed cache from a
/// production client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeEnv {
    #[default]
    Development,
    Production,
}

/// Configuration for building requests, serving them and caching results.
///
/// # Fields
///
/// * `server_fn_base` - Path prefix under which server functions are served.
///   Default: `/_server`.
///
/// * `max_payload_size` - Maximum size in bytes of the GET `payload` query
///   parameter. Larger payloads are rejected with `PayloadTooLarge`.
///   Default: 1,000,000 bytes.
///
/// * `environment` - Development or production. Default: development.
///
/// * `debug_logging` - Trace every request, response status and a truncated
///   payload preview. Default: false.
///
/// * `sanitize_errors` - Strip internal error details from failure responses.
///   Default: true.
///
/// * `static_cache_dir` - Public output directory backing the filesystem
///   static cache. Default: none.
///
/// * `static_memo_capacity` - Entries kept by the client-side static fetch
///   memo before the least recently used one is evicted. Default: 1024.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFnConfig {
    /// Path prefix for server function URLs (default: /_server)
    pub server_fn_base: String,
    /// Maximum GET payload size in bytes (default: 1MB)
    pub max_payload_size: usize,
    /// Runtime environment (default: Development)
    pub environment: RuntimeEnv,
    /// Enable request tracing (default: false)
    pub debug_logging: bool,
    /// Hide internal error details from clients (default: true)
    pub sanitize_errors: bool,
    /// Public directory of the filesystem static cache (default: None)
    pub static_cache_dir: Option<PathBuf>,
    /// Capacity of the client-side static fetch memo (default: 1024)
    pub static_memo_capacity: usize,
}

impl Default for ServerFnConfig {
    fn default() -> Self {
        Self {
            server_fn_base: "/_server".to_string(),
            max_payload_size: 1_000_000,
            environment: RuntimeEnv::default(),
            debug_logging: false,
            sanitize_errors: true,
            static_cache_dir: None,
            static_memo_capacity: 1024,
        }
    }
}

impl ServerFnConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from defaults overridden by the process
    /// environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base) = std::env::var(ENV_SERVER_FN_BASE) {
            config.server_fn_base = base;
        }
        if let Ok(dir) = std::env::var(ENV_OUTPUT_PUBLIC_DIR) {
            config.static_cache_dir = Some(PathBuf::from(dir));
        }
        if let Ok(env) = std::env::var(ENV_RUNTIME) {
            if env.eq_ignore_ascii_case("production") {
                config.environment = RuntimeEnv::Production;
            }
        }
        config
    }

    /// Set the server function path prefix.
    pub fn with_server_fn_base(mut self, base: impl Into<String>) -> Self {
        self.server_fn_base = base.into();
        self
    }

    /// Set the maximum GET payload size in bytes.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the runtime environment.
    pub fn with_environment(mut self, environment: RuntimeEnv) -> Self {
        self.environment = environment;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Enable or disable error sanitization.
    pub fn with_sanitize_errors(mut self, enabled: bool) -> Self {
        self.sanitize_errors = enabled;
        self
    }

    /// Set the public directory backing the filesystem static cache.
    pub fn with_static_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_cache_dir = Some(dir.into());
        self
    }

    /// Set the capacity of the client-side static fetch memo.
    pub fn with_static_memo_capacity(mut self, capacity: usize) -> Self {
        self.static_memo_capacity = capacity;
        self
    }

    pub fn is_production(&self) -> bool {
        self.environment == RuntimeEnv::Production
    }

    /// The base path without leading or trailing slashes.
    pub fn sanitized_base(&self) -> &str {
        self.server_fn_base.trim_matches('/')
    }

    /// URL of a server function under the configured base.
    pub fn function_url(&self, function_id: &str) -> String {
        let encoded: String =
            url::form_urlencoded::byte_serialize(function_id.as_bytes()).collect();
        format!("/{}/{}", self.sanitized_base(), encoded)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.sanitized_base().is_empty() {
            return Err("server_fn_base must not be empty".to_string());
        }
        if self.max_payload_size == 0 {
            return Err("max_payload_size must be greater than 0".to_string());
        }
        if self.static_memo_capacity == 0 {
            return Err("static_memo_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}
