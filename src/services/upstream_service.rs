//! src/services/upstream_service.rs
//!
//! UpstreamClient: authenticated, retried and optionally cached access to
//! the remote storage API. Every response is normalized into the
//! `Container`/`File` model before it leaves this module, so callers never
//! see the API's heterogeneous payload shapes.

use crate::models::{
    container::{Container, File},
    source::Source,
};
use crate::services::cache::{MemoryStore, TtlStore};
use crate::services::retry::{Attempt, RetryPolicy};
use futures::future::join_all;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_API_BASE_URL: &str = "https://api.torbox.app/v1/api";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{provider}: {detail}")]
    Api { provider: Source, detail: String },
    #[error("{provider}: upstream returned HTTP {status}: {detail}")]
    Status {
        provider: Source,
        status: u16,
        detail: String,
    },
    #[error("{provider}: no response within {timeout:?}")]
    Timeout { provider: Source, timeout: Duration },
    #[error("{provider}: request failed: {message}")]
    Transport { provider: Source, message: String },
    #[error("{provider}: unreadable response: {message}")]
    Decode { provider: Source, message: String },
}

impl UpstreamError {
    /// Short reason safe to show to users; `Display` carries the detail
    /// meant for logs.
    pub fn summary(&self) -> String {
        match self {
            UpstreamError::Api { provider, detail } => format!("{provider}: {detail}"),
            UpstreamError::Status {
                provider, status, ..
            } => format!("{provider}: upstream returned HTTP {status}"),
            UpstreamError::Timeout { provider, .. } => format!("{provider}: upstream timed out"),
            UpstreamError::Transport { provider, .. } => {
                format!("{provider}: upstream unreachable")
            }
            UpstreamError::Decode { provider, .. } => {
                format!("{provider}: upstream sent an unreadable response")
            }
        }
    }

    pub fn provider(&self) -> Source {
        match self {
            UpstreamError::Api { provider, .. }
            | UpstreamError::Status { provider, .. }
            | UpstreamError::Timeout { provider, .. }
            | UpstreamError::Transport { provider, .. }
            | UpstreamError::Decode { provider, .. } => *provider,
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Tunables for talking to the remote API.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// API root, e.g. `https://api.torbox.app/v1/api`.
    pub base_url: String,

    /// Items requested per list page.
    pub page_size: usize,

    /// Safety cap on pages fetched for one listing.
    pub max_pages: usize,

    /// Hard timeout for one HTTP attempt, body included.
    pub attempt_timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            page_size: 1000,
            max_pages: 200,
            attempt_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

pub type ContainerList = Arc<Vec<Container>>;

/// Stores backing the client's read-through cache.
#[derive(Clone)]
pub struct UpstreamCache {
    pub lists: Arc<dyn TtlStore<ContainerList>>,
    pub items: Arc<dyn TtlStore<Option<Arc<Container>>>>,
    pub ttl: Duration,
}

impl UpstreamCache {
    /// Process-local stores bounded to `max_entries` each.
    pub fn in_memory(ttl: Duration, max_entries: usize) -> Self {
        Self {
            lists: Arc::new(MemoryStore::<ContainerList>::new(max_entries)),
            items: Arc::new(MemoryStore::<Option<Arc<Container>>>::new(max_entries)),
            ttl,
        }
    }
}

/// Result of listing every source at once.
///
/// One failing source never hides the others.
#[derive(Debug, Default)]
pub struct FanOut {
    pub listings: Vec<(Source, ContainerList)>,
    pub failures: Vec<(Source, UpstreamError)>,
}

impl FanOut {
    pub fn all_failed(&self) -> bool {
        self.listings.is_empty() && !self.failures.is_empty()
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.listings.iter().flat_map(|(_, list)| list.iter())
    }
}

/// UpstreamClient issues every call to the remote API.
///
/// Cheap to clone; clones share the HTTP connection pool and cache stores.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    settings: Arc<UpstreamSettings>,
    cache: Option<UpstreamCache>,
}

impl UpstreamClient {
    /// Build a client. Caching is off when `cache` is `None` or its TTL is zero.
    pub fn new(settings: UpstreamSettings, cache: Option<UpstreamCache>) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("boxdir/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            settings: Arc::new(settings),
            cache: cache.filter(|cache| !cache.ttl.is_zero()),
        })
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    /// All containers of one source, in upstream order.
    ///
    /// Served from cache while fresh; otherwise every page is fetched.
    pub async fn list_by_source(
        &self,
        provider: Source,
        access_key: &str,
    ) -> UpstreamResult<ContainerList> {
        let cache_key = format!("{provider}:{access_key}");
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lists.get(&cache_key) {
                debug!(%provider, containers = hit.len(), "list cache hit");
                return Ok(hit);
            }
        }

        let containers = Arc::new(self.fetch_all_pages(provider, access_key).await?);
        debug!(%provider, containers = containers.len(), "listed containers");

        if let Some(cache) = &self.cache {
            cache.lists.prune();
            cache
                .lists
                .set_with_ttl(&cache_key, Arc::clone(&containers), cache.ttl);
        }
        Ok(containers)
    }

    /// One container by id; `None` when it does not exist or has no files.
    ///
    /// Misses are cached as well as hits.
    pub async fn get_by_id(
        &self,
        provider: Source,
        access_key: &str,
        container_id: u64,
    ) -> UpstreamResult<Option<Arc<Container>>> {
        let cache_key = format!("{provider}:{container_id}:{access_key}");
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.items.get(&cache_key) {
                debug!(%provider, container_id, found = hit.is_some(), "item cache hit");
                return Ok(hit);
            }
        }

        let query = [("id", container_id.to_string())];
        let data: Option<OneOrMany<RawItem>> = self
            .fetch(provider, "mylist", &query, access_key)
            .await?;
        let container = data
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .find(|item| item.id == container_id)
            .and_then(|item| normalize_container(provider, item))
            .map(Arc::new);

        if let Some(cache) = &self.cache {
            cache.items.prune();
            cache
                .items
                .set_with_ttl(&cache_key, container.clone(), cache.ttl);
        }
        Ok(container)
    }

    /// Ask the API for a short-lived download URL. Never cached.
    pub async fn download_url(
        &self,
        provider: Source,
        access_key: &str,
        container_id: u64,
        file_id: u64,
    ) -> UpstreamResult<String> {
        let query = [
            (provider.download_id_param(), container_id.to_string()),
            ("file_id", file_id.to_string()),
            ("redirect", "false".to_string()),
        ];
        let data: Option<String> = self
            .fetch(provider, "requestdl", &query, access_key)
            .await?;
        data.map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| UpstreamError::Api {
                provider,
                detail: "no download link returned".to_string(),
            })
    }

    /// List every source concurrently and collect successes and failures.
    pub async fn list_all(&self, access_key: &str) -> FanOut {
        let results = join_all(Source::ALL.into_iter().map(|provider| async move {
            (provider, self.list_by_source(provider, access_key).await)
        }))
        .await;

        let mut fan_out = FanOut::default();
        for (provider, result) in results {
            match result {
                Ok(list) => fan_out.listings.push((provider, list)),
                Err(err) => {
                    warn!(%provider, error = %err, "source listing failed");
                    fan_out.failures.push((provider, err));
                }
            }
        }
        fan_out
    }

    async fn fetch_all_pages(
        &self,
        provider: Source,
        access_key: &str,
    ) -> UpstreamResult<Vec<Container>> {
        let page_size = self.settings.page_size.max(1);
        let mut containers = Vec::new();
        let mut offset = 0usize;

        for page in 0..self.settings.max_pages {
            let query = [
                ("offset", offset.to_string()),
                ("limit", page_size.to_string()),
            ];
            let data: Option<OneOrMany<RawItem>> = self
                .fetch(provider, "mylist", &query, access_key)
                .await?;
            let raw = data.map(OneOrMany::into_vec).unwrap_or_default();
            let fetched = raw.len();
            debug!(%provider, page, offset, fetched, "fetched list page");

            containers.extend(
                raw.into_iter()
                    .filter_map(|item| normalize_container(provider, item)),
            );
            if fetched < page_size {
                return Ok(containers);
            }
            offset += fetched;
        }

        warn!(
            %provider,
            max_pages = self.settings.max_pages,
            "stopped paginating at page cap"
        );
        Ok(containers)
    }

    /// GET `{base}/{provider}/{endpoint}` with retries; returns the envelope data.
    async fn fetch<T: DeserializeOwned>(
        &self,
        provider: Source,
        endpoint: &str,
        query: &[(&str, String)],
        access_key: &str,
    ) -> UpstreamResult<Option<T>> {
        let url = format!(
            "{}/{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            provider.as_str(),
            endpoint
        );
        self.settings
            .retry
            .run(&url, || self.attempt(provider, &url, query, access_key))
            .await
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        provider: Source,
        url: &str,
        query: &[(&str, String)],
        access_key: &str,
    ) -> Attempt<Option<T>, UpstreamError> {
        let request = self
            .http
            .get(url)
            .bearer_auth(access_key)
            .query(query)
            .send();
        let timeout = self.settings.attempt_timeout;

        let outcome = tokio::time::timeout(timeout, async {
            let response = request.await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        })
        .await;

        let (status, body) = match outcome {
            Err(_) => return Attempt::Retryable(UpstreamError::Timeout { provider, timeout }),
            Ok(Err(err)) => {
                return Attempt::Retryable(UpstreamError::Transport {
                    provider,
                    message: err.without_url().to_string(),
                });
            }
            Ok(Ok(pair)) => pair,
        };

        if !status.is_success() {
            let err = UpstreamError::Status {
                provider,
                status: status.as_u16(),
                detail: error_detail(status, &body),
            };
            return if is_retryable_status(status) {
                Attempt::Retryable(err)
            } else {
                Attempt::Terminal(err)
            };
        }

        match serde_json::from_slice::<Envelope<T>>(&body) {
            Err(err) => Attempt::Terminal(UpstreamError::Decode {
                provider,
                message: err.to_string(),
            }),
            Ok(envelope) if !envelope.success => Attempt::Terminal(UpstreamError::Api {
                provider,
                detail: envelope
                    .detail
                    .or(envelope.error)
                    .unwrap_or_else(|| "request failed".to_string()),
            }),
            Ok(envelope) => Attempt::Success(envelope.data),
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Best human-readable reason for a non-2xx response.
fn error_detail(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.detail.or(parsed.error))
        .filter(|detail| !detail.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        })
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    error: Option<String>,
    detail: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    detail: Option<String>,
}

/// `data` may be a single item or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: u64,
    name: Option<String>,
    files: Option<Vec<RawFile>>,
    download_present: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    id: u64,
    name: Option<String>,
    short_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_size")]
    size: u64,
}

/// Accept numbers, numeric strings and null; anything else counts as 0.
fn lenient_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|size| size.is_finite() && *size > 0.0)
                    .map(|size| size as u64)
            })
            .unwrap_or(0),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn basename(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
}

/// Turn an API item into a container, dropping items with nothing to serve.
fn normalize_container(provider: Source, item: RawItem) -> Option<Container> {
    if item.download_present == Some(false) {
        return None;
    }
    let container_id = item.id;
    let files: Vec<File> = item
        .files
        .unwrap_or_default()
        .into_iter()
        .map(|raw| normalize_file(provider, container_id, raw))
        .collect();
    if files.is_empty() {
        return None;
    }

    let container_name =
        non_blank(item.name).unwrap_or_else(|| format!("{provider}-{container_id}"));
    Some(Container {
        source: provider,
        container_id,
        container_name,
        files,
    })
}

fn normalize_file(provider: Source, container_id: u64, raw: RawFile) -> File {
    let long_name = non_blank(raw.name);
    let short_name = non_blank(raw.short_name);

    let full_name = long_name
        .or_else(|| short_name.clone())
        .unwrap_or_else(|| format!("file-{}", raw.id));
    let display_name = short_name.unwrap_or_else(|| basename(&full_name).to_string());

    File {
        source: provider,
        container_id,
        file_id: raw.id,
        full_name,
        display_name,
        size: raw.size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const KEY: &str = "secret-key";

    fn settings(server: &MockServer) -> UpstreamSettings {
        UpstreamSettings {
            base_url: server.base_url(),
            page_size: 2,
            max_pages: 10,
            attempt_timeout: Duration::from_secs(2),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
        }
    }

    fn client(server: &MockServer) -> UpstreamClient {
        UpstreamClient::new(settings(server), None).expect("client builds")
    }

    fn cached_client(server: &MockServer, ttl: Duration) -> UpstreamClient {
        UpstreamClient::new(settings(server), Some(UpstreamCache::in_memory(ttl, 64)))
            .expect("client builds")
    }

    fn item(id: u64, name: &str, files: Value) -> Value {
        json!({ "id": id, "name": name, "files": files, "download_present": true })
    }

    fn one_file(id: u64) -> Value {
        json!([{ "id": id, "name": format!("dir/file{id}.mkv"), "short_name": format!("file{id}.mkv"), "size": 100 }])
    }

    fn ok(data: Value) -> Value {
        json!({ "success": true, "error": null, "detail": "ok", "data": data })
    }

    #[tokio::test]
    async fn paginates_until_a_short_page() {
        let server = MockServer::start_async().await;
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/torrents/mylist")
                .query_param("offset", "0")
                .query_param("limit", "2")
                .header("authorization", format!("Bearer {KEY}"));
            then.status(200).json_body(ok(json!([
                item(1, "one", one_file(10)),
                item(2, "empty", json!([])),
            ])));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/torrents/mylist")
                .query_param("offset", "2");
            then.status(200)
                .json_body(ok(json!([item(3, "three", one_file(30))])));
        });

        let containers = client(&server)
            .list_by_source(Source::Torrents, KEY)
            .await
            .expect("listing succeeds");

        first.assert_calls(1);
        second.assert_calls(1);
        let ids: Vec<u64> = containers.iter().map(|c| c.container_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(containers.iter().all(|c| c.source == Source::Torrents));
    }

    #[tokio::test]
    async fn null_data_is_an_empty_listing() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/usenet/mylist");
            then.status(200).json_body(ok(Value::Null));
        });

        let containers = client(&server)
            .list_by_source(Source::Usenet, KEY)
            .await
            .expect("listing succeeds");
        assert!(containers.is_empty());
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn cache_hit_skips_the_network() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/webdl/mylist");
            then.status(200)
                .json_body(ok(json!([item(5, "five", one_file(50))])));
        });

        let client = cached_client(&server, Duration::from_secs(60));
        let first = client.list_by_source(Source::WebDl, KEY).await.unwrap();
        let second = client.list_by_source(Source::WebDl, KEY).await.unwrap();

        assert_eq!(first, second);
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn expired_cache_entry_triggers_a_fresh_call() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/webdl/mylist");
            then.status(200)
                .json_body(ok(json!([item(5, "five", one_file(50))])));
        });

        let client = cached_client(&server, Duration::from_millis(50));
        client.list_by_source(Source::WebDl, KEY).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        client.list_by_source(Source::WebDl, KEY).await.unwrap();

        mock.assert_calls(2);
    }

    #[tokio::test]
    async fn different_keys_never_share_cache_entries() {
        let server = MockServer::start_async().await;
        let alice = server.mock(|when, then| {
            when.method(GET)
                .path("/torrents/mylist")
                .header("authorization", "Bearer alice");
            then.status(200)
                .json_body(ok(json!([item(1, "alice", one_file(1))])));
        });
        let bob = server.mock(|when, then| {
            when.method(GET)
                .path("/torrents/mylist")
                .header("authorization", "Bearer bob");
            then.status(200).json_body(ok(json!([])));
        });

        let client = cached_client(&server, Duration::from_secs(60));
        let for_alice = client.list_by_source(Source::Torrents, "alice").await.unwrap();
        let for_bob = client.list_by_source(Source::Torrents, "bob").await.unwrap();

        assert_eq!(for_alice.len(), 1);
        assert!(for_bob.is_empty());
        alice.assert_calls(1);
        bob.assert_calls(1);
    }

    #[tokio::test]
    async fn missing_container_is_cached_negatively() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/torrents/mylist")
                .query_param("id", "404");
            then.status(200).json_body(ok(Value::Null));
        });

        let client = cached_client(&server, Duration::from_secs(60));
        assert!(client.get_by_id(Source::Torrents, KEY, 404).await.unwrap().is_none());
        assert!(client.get_by_id(Source::Torrents, KEY, 404).await.unwrap().is_none());
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn get_by_id_accepts_a_single_object() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/usenet/mylist").query_param("id", "7");
            then.status(200).json_body(ok(item(7, "seven", one_file(70))));
        });

        let container = client(&server)
            .get_by_id(Source::Usenet, KEY, 7)
            .await
            .unwrap()
            .expect("container exists");
        assert_eq!(container.container_name, "seven");
        assert_eq!(container.files[0].file_id, 70);
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_the_budget_is_spent() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/torrents/mylist");
            then.status(503);
        });

        let err = client(&server)
            .list_by_source(Source::Torrents, KEY)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
        assert_eq!(err.provider(), Source::Torrents);
        mock.assert_calls(3);
    }

    #[tokio::test]
    async fn client_errors_abort_without_retrying() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/torrents/mylist");
            then.status(401).json_body(json!({
                "success": false,
                "error": "AUTH_ERROR",
                "detail": "Invalid API key",
                "data": null
            }));
        });

        let err = client(&server)
            .list_by_source(Source::Torrents, KEY)
            .await
            .unwrap_err();
        match err {
            UpstreamError::Status { status, detail, .. } => {
                assert_eq!(status, 401);
                assert_eq!(detail, "Invalid API key");
            }
            other => panic!("unexpected error {other:?}"),
        }
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_an_api_error() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/webdl/mylist");
            then.status(200).json_body(json!({
                "success": false,
                "error": "DATABASE_ERROR",
                "detail": "Try again later",
                "data": null
            }));
        });

        let err = client(&server)
            .list_by_source(Source::WebDl, KEY)
            .await
            .unwrap_err();
        assert!(
            matches!(err, UpstreamError::Api { ref detail, .. } if detail == "Try again later")
        );
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn timed_out_attempts_consume_the_retry_budget() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/usenet/mylist");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(ok(json!([])));
        });

        let mut slow = settings(&server);
        slow.attempt_timeout = Duration::from_millis(50);
        slow.retry.max_retries = 1;
        let client = UpstreamClient::new(slow, None).unwrap();

        let err = client.list_by_source(Source::Usenet, KEY).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { .. }));
        mock.assert_calls(2);
    }

    #[tokio::test]
    async fn fan_out_tolerates_partial_failure() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/torrents/mylist");
            then.status(200)
                .json_body(ok(json!([item(1, "t", one_file(1))])));
        });
        server.mock(|when, then| {
            when.method(GET).path("/webdl/mylist");
            then.status(500);
        });
        server.mock(|when, then| {
            when.method(GET).path("/usenet/mylist");
            then.status(200)
                .json_body(ok(json!([item(2, "u", one_file(2))])));
        });

        let fan_out = client(&server).list_all(KEY).await;
        assert!(!fan_out.all_failed());
        assert_eq!(fan_out.containers().count(), 2);
        assert_eq!(fan_out.failures.len(), 1);
        assert_eq!(fan_out.failures[0].0, Source::WebDl);
    }

    #[tokio::test]
    async fn fan_out_reports_total_failure() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET);
            then.status(502);
        });

        let fan_out = client(&server).list_all(KEY).await;
        assert!(fan_out.all_failed());
        assert_eq!(fan_out.failures.len(), Source::ALL.len());
    }

    #[tokio::test]
    async fn download_url_sends_source_specific_ids() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/webdl/requestdl")
                .query_param("web_id", "12")
                .query_param("file_id", "3")
                .header("authorization", format!("Bearer {KEY}"));
            then.status(200)
                .json_body(ok(json!("https://cdn.example/file?token=abc")));
        });

        let url = client(&server)
            .download_url(Source::WebDl, KEY, 12, 3)
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example/file?token=abc");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn transport_failures_keep_internal_detail_out_of_the_summary() {
        let server = MockServer::start_async().await;
        let mut unreachable = settings(&server);
        // Nothing listens on port 9 of the loopback interface.
        unreachable.base_url = "http://127.0.0.1:9/v1/api".to_string();
        unreachable.retry.max_retries = 0;
        let client = UpstreamClient::new(unreachable, None).unwrap();

        let err = client.list_by_source(Source::Torrents, KEY).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Transport { .. }));
        assert_eq!(err.summary(), "torrents: upstream unreachable");
        assert!(!err.to_string().contains("127.0.0.1:9"));
    }

    #[test]
    fn decode_failures_summarize_without_parser_detail() {
        let err = UpstreamError::Decode {
            provider: Source::WebDl,
            message: "expected value at line 1 column 1".to_string(),
        };
        assert_eq!(err.summary(), "webdl: upstream sent an unreadable response");
    }

    #[test]
    fn normalization_fills_in_missing_names_and_sizes() {
        let raw: RawItem = serde_json::from_value(json!({
            "id": 9,
            "name": "   ",
            "files": [
                { "id": 1, "name": "Show/S01/e01.mkv", "short_name": null, "size": null },
                { "id": 2, "name": null, "short_name": "e02.mkv", "size": "2048" },
                { "id": 3, "size": 0 },
                { "id": 4, "name": "plain.txt", "size": 12.0 }
            ]
        }))
        .unwrap();

        let container = normalize_container(Source::Usenet, raw).expect("has files");
        assert_eq!(container.container_name, "usenet-9");

        let names: Vec<(&str, &str, u64)> = container
            .files
            .iter()
            .map(|f| (f.full_name.as_str(), f.display_name.as_str(), f.size))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Show/S01/e01.mkv", "e01.mkv", 0),
                ("e02.mkv", "e02.mkv", 2048),
                ("file-3", "file-3", 0),
                ("plain.txt", "plain.txt", 12),
            ]
        );
        assert!(container.files.iter().all(|f| f.container_id == 9));
    }

    #[test]
    fn unavailable_or_empty_items_are_dropped() {
        let unavailable: RawItem = serde_json::from_value(json!({
            "id": 1, "name": "gone", "download_present": false, "files": one_file(1)
        }))
        .unwrap();
        assert!(normalize_container(Source::Torrents, unavailable).is_none());

        let no_files: RawItem =
            serde_json::from_value(json!({ "id": 2, "name": "queued", "files": null })).unwrap();
        assert!(normalize_container(Source::Torrents, no_files).is_none());
    }
}
