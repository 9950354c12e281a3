//! Cache storage: named generations of request/response pairs.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use offline_net::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use offline_net::{Network, Request, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::ServiceWorkerError;

/// Identity of a cached request: method plus URL, without the fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);

        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    pub fn of(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, repeated names kept.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for the given request.
    pub fn capture(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let key = RequestKey::of(request);

        Self {
            url: key.url,
            method: key.method,
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response, ServiceWorkerError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", self.url, e)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", name, e)))?;
            headers.append(name, value);
        }

        Ok(Response::new(
            url,
            status,
            headers,
            Bytes::copy_from_slice(&self.body),
        ))
    }
}

/// A cache generation.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request by method and URL.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.entries.get(&RequestKey::of(request))
    }

    /// Store a response for a request, replacing any previous entry.
    pub fn put(&mut self, request: &Request, response: &Response) {
        let entry = CacheEntry::capture(request, response);
        self.entries.insert(entry.key(), entry);
    }

    /// Fetch every URL and store the responses.
    ///
    /// All-or-nothing: if any fetch fails or returns a non-2xx status,
    /// nothing is stored and the error is returned.
    pub async fn add_all(
        &mut self,
        network: &dyn Network,
        urls: &[Url],
    ) -> Result<(), ServiceWorkerError> {
        let mut fetched = Vec::with_capacity(urls.len());

        for url in urls {
            let request = Request::get(url.clone());
            let response = network.fetch(request.clone()).await.map_err(|e| {
                warn!(cache = %self.name, url = %url, error = %e, "Precache fetch failed");
                ServiceWorkerError::InstallFailed(format!("{}: {}", url, e))
            })?;

            if !response.ok() {
                warn!(cache = %self.name, url = %url, status = %response.status, "Precache fetch returned error status");
                return Err(ServiceWorkerError::InstallFailed(format!(
                    "{}: status {}",
                    url, response.status
                )));
            }

            fetched.push((request, response));
        }

        for (request, response) in &fetched {
            self.put(request, response);
        }
        debug!(cache = %self.name, added = fetched.len(), "Cache populated");
        Ok(())
    }

    /// Delete entry.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries.remove(&RequestKey::of(request)).is_some()
    }

    /// All cached request keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Every cache generation, by name.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Store a whole generation, replacing one with the same name.
    pub fn insert(&mut self, cache: Cache) {
        self.caches.insert(cache.name.clone(), cache);
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
