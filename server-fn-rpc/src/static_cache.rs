//! Static result cache
//!
//! Server functions of type `static` may have their results precomputed.
//! A build step executes them on the server and writes each outcome (value
//! or raised error) with [`StaticCache::set_item`]; a production client then
//! reads it back with [`StaticCache::fetch_item`] instead of calling the
//! server.
//!
//! Entries live at
//! `/__tsr/staticServerFnCache/<filename>__<functionId>__<hash>.json`, where
//! the hash is the key-sorted JSON of the call data with filesystem-unsafe
//! characters replaced.

use crate::config::ServerFnConfig;
use crate::context::{MiddlewareCtx, Payload};
use crate::error::{RpcError, RpcResult, ServerFnError};
use crate::fetcher::{Body, FetchHandler, ServerFnEnvelope};
use futures::future::BoxFuture;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

/// URL prefix of every static cache entry.
pub const STATIC_CACHE_PREFIX: &str = "/__tsr/staticServerFnCache";

/// Outcome of one server run, as stored in the static cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StaticCachedResult {
    #[serde(default)]
    pub ctx: Option<ServerFnEnvelope>,
    #[serde(default)]
    pub error: Option<ServerFnError>,
}

impl StaticCachedResult {
    pub fn success(ctx: ServerFnEnvelope) -> Self {
        Self {
            ctx: Some(ctx),
            error: None,
        }
    }

    pub fn failure(error: ServerFnError) -> Self {
        Self {
            ctx: None,
            error: Some(error),
        }
    }

    /// Replay the stored outcome: the envelope, or the stored error raised.
    pub fn into_result(self) -> Result<ServerFnEnvelope, ServerFnError> {
        match (self.error, self.ctx) {
            (Some(error), _) => Err(error),
            (None, ctx) => Ok(ctx.unwrap_or_default()),
        }
    }
}

/// Pluggable store for precomputed server-function outcomes.
///
/// `get_item` and `set_item` run on the server, `fetch_item` on the client.
/// A store may implement any subset; the defaults report a miss and ignore
/// writes.
pub trait StaticCache: Send + Sync {
    fn get_item<'a>(
        &'a self,
        _ctx: &'a MiddlewareCtx,
    ) -> BoxFuture<'a, RpcResult<Option<StaticCachedResult>>> {
        Box::pin(async { Ok(None) })
    }

    fn set_item<'a>(
        &'a self,
        _ctx: &'a MiddlewareCtx,
        _response: &'a StaticCachedResult,
    ) -> BoxFuture<'a, RpcResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn fetch_item<'a>(
        &'a self,
        _ctx: &'a MiddlewareCtx,
    ) -> BoxFuture<'a, RpcResult<Option<StaticCachedResult>>> {
        Box::pin(async { Ok(None) })
    }
}

/// Filename-safe hash of the call data.
///
/// Object keys are sorted recursively, array order is kept, and an absent
/// payload hashes as the empty string.
pub fn cache_key_hash(data: &Payload) -> String {
    let value = match data.to_json() {
        serde_json::Value::Null => serde_json::Value::String(String::new()),
        other => canonicalize(other),
    };
    filename_safe(&value.to_string())
}

/// Artifact path of the entry for `ctx`.
pub fn static_cache_path(ctx: &MiddlewareCtx) -> String {
    format!(
        "{}/{}__{}__{}.json",
        STATIC_CACHE_PREFIX,
        ctx.filename,
        ctx.function_id,
        cache_key_hash(&ctx.data)
    )
}

fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}

fn filename_safe(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_whitespace = false;
    for c in json.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        match c {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' => out.push('-'),
            c => out.push(c),
        }
    }
    out
}

fn decode_entry(text: &str) -> RpcResult<StaticCachedResult> {
    serde_json::from_str(text)
        .map_err(|e| RpcError::static_cache(format!("Corrupt static cache entry: {}", e)))
}

/// Server-side store writing entries under a public output directory.
#[derive(Debug, Clone)]
pub struct FsStaticCache {
    root: PathBuf,
}

impl FsStaticCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `config.static_cache_dir`.
    pub fn from_config(config: &ServerFnConfig) -> RpcResult<Self> {
        config
            .static_cache_dir
            .as_ref()
            .map(|dir| Self::new(dir.clone()))
            .ok_or_else(|| RpcError::static_cache("static_cache_dir is not configured"))
    }

    /// Filesystem location of the entry for `ctx`.
    pub fn file_path(&self, ctx: &MiddlewareCtx) -> PathBuf {
        self.root
            .join(static_cache_path(ctx).trim_start_matches('/'))
    }
}

impl StaticCache for FsStaticCache {
    fn get_item<'a>(
        &'a self,
        ctx: &'a MiddlewareCtx,
    ) -> BoxFuture<'a, RpcResult<Option<StaticCachedResult>>> {
        Box::pin(async move {
            let path = self.file_path(ctx);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    tracing::debug!(path = %path.display(), "static cache hit");
                    decode_entry(&text).map(Some)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "static cache miss");
                    Ok(None)
                }
                Err(e) => Err(RpcError::static_cache(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                ))),
            }
        })
    }

    fn set_item<'a>(
        &'a self,
        ctx: &'a MiddlewareCtx,
        response: &'a StaticCachedResult,
    ) -> BoxFuture<'a, RpcResult<()>> {
        Box::pin(async move {
            let path = self.file_path(ctx);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let text = serde_json::to_string(response)?;
            tokio::fs::write(&path, text).await?;
            tracing::debug!(path = %path.display(), "static cache entry written");
            Ok(())
        })
    }
}

/// Client-side store fetching entries over the injected transport.
///
/// Fetched entries are memoized in a bounded LRU so repeated calls in one
/// session do not hit the transport again.
pub struct HttpStaticCache {
    handler: FetchHandler,
    memo: Mutex<LruCache<String, StaticCachedResult>>,
}

impl HttpStaticCache {
    pub fn new(handler: FetchHandler, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            handler,
            memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(handler: FetchHandler, config: &ServerFnConfig) -> Self {
        Self::new(handler, config.static_memo_capacity)
    }

    /// Number of memoized entries.
    pub async fn memoized(&self) -> usize {
        self.memo.lock().await.len()
    }
}

impl StaticCache for HttpStaticCache {
    fn fetch_item<'a>(
        &'a self,
        ctx: &'a MiddlewareCtx,
    ) -> BoxFuture<'a, RpcResult<Option<StaticCachedResult>>> {
        Box::pin(async move {
            let url = static_cache_path(ctx);
            if let Some(hit) = self.memo.lock().await.get(&url) {
                return Ok(Some(hit.clone()));
            }

            let mut request = http::Request::new(Body::Empty);
            *request.uri_mut() = url
                .parse()
                .map_err(|e| {
                    RpcError::static_cache(format!("Invalid static cache URL {}: {}", url, e))
                })?;
            let response = (self.handler)(request).await?;
            let status = response.status();
            if status == http::StatusCode::NOT_FOUND {
                tracing::debug!(url = %url, "static cache entry not published");
                return Ok(None);
            }
            if !status.is_success() {
                return Err(RpcError::static_cache(format!(
                    "Fetching {} failed with status {}",
                    url, status
                )));
            }

            let entry = decode_entry(&response.into_body().into_text()?)?;
            self.memo.lock().await.put(url, entry.clone());
            Ok(Some(entry))
        })
    }
}

/// In-process store answering all three operations.
#[derive(Debug, Default)]
pub struct MemoryStaticCache {
    entries: RwLock<HashMap<String, StaticCachedResult>>,
}

impl MemoryStaticCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl StaticCache for MemoryStaticCache {
    fn get_item<'a>(
        &'a self,
        ctx: &'a MiddlewareCtx,
    ) -> BoxFuture<'a, RpcResult<Option<StaticCachedResult>>> {
        Box::pin(async move { Ok(self.entries.read().await.get(&static_cache_path(ctx)).cloned()) })
    }

    fn set_item<'a>(
        &'a self,
        ctx: &'a MiddlewareCtx,
        response: &'a StaticCachedResult,
    ) -> BoxFuture<'a, RpcResult<()>> {
        Box::pin(async move {
            self.entries
                .write()
                .await
                .insert(static_cache_path(ctx), response.clone());
            Ok(())
        })
    }

    fn fetch_item<'a>(
        &'a self,
        ctx: &'a MiddlewareCtx,
    ) -> BoxFuture<'a, RpcResult<Option<StaticCachedResult>>> {
        self.get_item(ctx)
    }
}
