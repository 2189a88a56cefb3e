//! Local media cache: resilient image downloads and file existence checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use pfsync_core::MEDIA_PREFIX;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pfsync-storage";

const DEFAULT_MEDIA_ROOT: &str = "/mhp/media";
/// Minimum length of a path segment that passes for a content identifier.
const IDENTIFIER_MIN_LEN: usize = 30;
const COMPOUND_MARKER: &str = "_original";
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub media_root: PathBuf,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from(DEFAULT_MEDIA_ROOT),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

impl MediaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            media_root: std::env::var("MEDIA_ROOT")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            max_retries: positive_env("IMAGE_DOWNLOAD_MAX_RETRIES")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_retries),
            retry_delay: positive_env("IMAGE_DOWNLOAD_RETRY_DELAY")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_delay),
            request_timeout: positive_env("IMAGE_DOWNLOAD_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            user_agent: std::env::var("PF_USER_AGENT").ok(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            retry_delay: self.retry_delay,
        }
    }
}

fn positive_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

/// Fixed-delay retry bound: `max_retries` attempts in total, sleeping between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based); `None` after the last one.
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        (attempt < self.max_retries).then_some(self.retry_delay)
    }
}

/// Everything below the configured media root.
#[derive(Debug, Clone)]
pub struct MediaRoot {
    root: PathBuf,
}

impl MediaRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Presence check only; content and size are not inspected.
    ///
    /// Only a definite "not found" counts as missing. Other I/O errors are
    /// logged and the file is reported present, so it is never re-fetched.
    pub async fn exists(&self, relative: &str) -> bool {
        if relative.is_empty() {
            return false;
        }
        let absolute = self.absolute_path(relative);
        match fs::try_exists(&absolute).await {
            Ok(found) => found,
            Err(err) => {
                warn!(path = %absolute.display(), error = %err, "cannot stat media file; treating as present");
                true
            }
        }
    }
}

/// Failure of a single download attempt. Always retried.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty body downloaded from {url}")]
    EmptyBody { url: String },
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file verification failed for {path}")]
    Verification { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("empty media url")]
    EmptyInput,
    #[error("media download failed after {attempts} attempts: {last_error}")]
    DownloadExhausted {
        attempts: usize,
        #[source]
        last_error: FetchFailure,
    },
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn qualifies_as_identifier(segment: &str) -> bool {
    segment.contains('-') && segment.len() >= IDENTIFIER_MIN_LEN
}

fn strip_image_extension(segment: &str) -> &str {
    let lower = segment.to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| &segment[..segment.len() - ext.len()])
        .unwrap_or(segment)
}

/// Last path segment that looks like a unique content id, e.g. a UUID directory
/// (`.../ce5950dd-d4b0-478e-ad32-176b8900bef1/original.jpg`) or a UUID-prefixed
/// file name (`.../f4440543-f51c-4227-bb92-6b24bbf466a3_original.jpg`).
pub fn content_identifier(url_path: &str) -> Option<&str> {
    for segment in url_path.trim_matches('/').split('/').rev() {
        if !qualifies_as_identifier(segment) {
            continue;
        }
        if segment.contains(COMPOUND_MARKER) {
            let head = segment.split('_').next().unwrap_or_default();
            if qualifies_as_identifier(head) {
                return Some(head);
            }
        } else {
            return Some(strip_image_extension(segment));
        }
    }
    None
}

/// Local file name for a downloaded image.
///
/// Falls back to `pf_<owner>_<index>_<hash8>.jpg` when the URL carries no
/// identifier, so generic names like `original.jpg` never collide.
pub fn media_filename(url_path: &str, owner_id: i64, sequence_index: usize) -> String {
    if let Some(identifier) = content_identifier(url_path) {
        return format!("{identifier}.jpg");
    }
    let hash = sha256_hex(url_path.as_bytes());
    format!("pf_{owner_id}_{sequence_index}_{}.jpg", &hash[..8])
}

/// Relative path a download of `url` would land on, absent redirects.
pub fn expected_media_path(url: &str, owner_id: i64, sequence_index: usize) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let filename = media_filename(parsed.path(), owner_id, sequence_index);
    Some(format!("{MEDIA_PREFIX}/{filename}"))
}

#[derive(Debug)]
pub struct MediaFetcher {
    client: reqwest::Client,
    root: MediaRoot,
    policy: RetryPolicy,
}

impl MediaFetcher {
    pub fn new(config: &MediaConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.request_timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building media http client")?;
        Ok(Self {
            client,
            root: MediaRoot::new(config.media_root.clone()),
            policy: config.retry_policy(),
        })
    }

    pub fn root(&self) -> &MediaRoot {
        &self.root
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Download `url` into the media root and return its path relative to that root.
    pub async fn fetch(
        &self,
        url: &str,
        owner_id: i64,
        sequence_index: usize,
    ) -> Result<String, MediaError> {
        if url.is_empty() {
            return Err(MediaError::EmptyInput);
        }

        let span = info_span!("media_fetch", owner_id, sequence_index, url);
        async move {
            let mut attempt = 1;
            loop {
                match self.attempt(url, owner_id, sequence_index).await {
                    Ok(relative) => {
                        if attempt > 1 {
                            info!(attempt, path = %relative, "media download succeeded after retry");
                        }
                        return Ok(relative);
                    }
                    Err(err) => match self.policy.delay_after(attempt) {
                        Some(delay) => {
                            warn!(
                                attempt,
                                max_retries = self.policy.max_retries,
                                error = %err,
                                "media download attempt failed; retrying in {:?}",
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            return Err(MediaError::DownloadExhausted {
                                attempts: attempt,
                                last_error: err,
                            });
                        }
                    },
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &self,
        url: &str,
        owner_id: i64,
        sequence_index: usize,
    ) -> Result<String, FetchFailure> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().clone();
        if !status.is_success() {
            return Err(FetchFailure::HttpStatus {
                status: status.as_u16(),
                url: final_url.to_string(),
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Err(FetchFailure::EmptyBody {
                url: final_url.to_string(),
            });
        }

        let body = resp.bytes().await?;
        let filename = media_filename(final_url.path(), owner_id, sequence_index);
        let relative = format!("{MEDIA_PREFIX}/{filename}");
        let absolute = self.root.absolute_path(&relative);

        let dir = self.root.absolute_path(MEDIA_PREFIX);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| FetchFailure::Io {
                action: "creating media directory",
                path: dir.clone(),
                source,
            })?;

        let written = write_atomically(&dir, &absolute, &body).await?;
        if written == 0 {
            let _ = fs::remove_file(&absolute).await;
            return Err(FetchFailure::EmptyBody {
                url: final_url.to_string(),
            });
        }

        match fs::metadata(&absolute).await {
            Ok(meta) if meta.len() > 0 => {
                debug!(path = %relative, bytes = meta.len(), "media stored");
                Ok(relative)
            }
            _ => {
                let _ = fs::remove_file(&absolute).await;
                Err(FetchFailure::Verification { path: absolute })
            }
        }
    }
}

/// Write through a temp file in `dir` and rename onto `target`, so a half-written
/// file never shows up under its final name.
async fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<usize, FetchFailure> {
    let temp_path = dir.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|source| FetchFailure::Io {
            action: "opening temp media file",
            path: temp_path.clone(),
            source,
        })?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok::<_, std::io::Error>(bytes.len())
    }
    .await;
    drop(file);

    let written = match written {
        Ok(n) => n,
        Err(source) => {
            let _ = fs::remove_file(&temp_path).await;
            return Err(FetchFailure::Io {
                action: "writing temp media file",
                path: temp_path,
                source,
            });
        }
    };
    if written == 0 {
        let _ = fs::remove_file(&temp_path).await;
        return Ok(0);
    }

    if let Err(source) = fs::rename(&temp_path, target).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(FetchFailure::Io {
            action: "renaming temp media file onto",
            path: target.to_path_buf(),
            source,
        });
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{StatusCode as AxumStatus, Uri};
    use axum::Router;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct ServerState {
        hits: Arc<AtomicUsize>,
    }

    /// Serves `/flaky/...` as 503 for the first two hits, `/empty/...` with no
    /// body, `/missing/...` as 404 and anything else as a small JPEG payload.
    async fn image_handler(State(state): State<ServerState>, uri: Uri) -> (AxumStatus, Vec<u8>) {
        let hit = state.hits.fetch_add(1, Ordering::SeqCst);
        let path = uri.path();
        if path.starts_with("/missing") {
            (AxumStatus::NOT_FOUND, Vec::new())
        } else if path.starts_with("/empty") {
            (AxumStatus::OK, Vec::new())
        } else if path.starts_with("/flaky") && hit < 2 {
            (AxumStatus::SERVICE_UNAVAILABLE, Vec::new())
        } else {
            (AxumStatus::OK, format!("jpeg:{path}").into_bytes())
        }
    }

    async fn spawn_image_server() -> (String, Arc<AtomicUsize>) {
        let state = ServerState::default();
        let hits = state.hits.clone();
        let app = Router::new().fallback(image_handler).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (format!("http://{addr}"), hits)
    }

    fn fast_config(root: &Path) -> MediaConfig {
        MediaConfig {
            media_root: root.to_path_buf(),
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
            user_agent: None,
        }
    }

    #[test]
    fn identifier_directory_names_the_file() {
        let path = "/media/images/listing/77/ce5950dd-d4b0-478e-ad32-176b8900bef1/original.jpg";
        assert_eq!(
            media_filename(path, 1, 0),
            "ce5950dd-d4b0-478e-ad32-176b8900bef1.jpg"
        );
    }

    #[test]
    fn compound_segment_keeps_only_identifier_part() {
        let path = "/media/tmp/f4440543-f51c-4227-bb92-6b24bbf466a3_original.jpg";
        assert_eq!(
            media_filename(path, 1, 0),
            "f4440543-f51c-4227-bb92-6b24bbf466a3.jpg"
        );
    }

    #[test]
    fn short_or_dashless_segments_do_not_qualify() {
        assert_eq!(content_identifier("/a/b-c/original.jpg"), None);
        assert_eq!(
            content_identifier("/a/abcdefghijklmnopqrstuvwxyz0123456789/original.jpg"),
            None
        );
        let name = media_filename("/a/b/original.jpg", 12, 3);
        assert!(name.starts_with("pf_12_3_"), "{name}");
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), "pf_12_3_".len() + 8 + ".jpg".len());
    }

    #[test]
    fn shared_terminal_names_with_distinct_identifiers_stay_distinct() {
        let names: HashSet<String> = (0..20)
            .map(|i| {
                let path = format!("/listing/{i}/0000aaaa-bbbb-cccc-dddd-{i:012}/original.jpg");
                media_filename(&path, 5, 0)
            })
            .collect();
        assert_eq!(names.len(), 20);
    }

    #[test]
    fn expected_path_ignores_host_and_query() {
        assert_eq!(
            expected_media_path(
                "https://cdn.example.com/media/ce5950dd-d4b0-478e-ad32-176b8900bef1/original.jpg?w=1",
                7,
                0
            )
            .as_deref(),
            Some("property_images/ce5950dd-d4b0-478e-ad32-176b8900bef1.jpg")
        );
        assert!(expected_media_path("not a url", 7, 0).is_none());
    }

    #[test]
    fn fallback_names_are_distinct_per_owner_and_index() {
        let mut names = HashSet::new();
        for owner in 0..5 {
            for index in 0..5 {
                names.insert(media_filename("/img/original.jpg", owner, index));
            }
        }
        assert_eq!(names.len(), 25);
    }

    #[test]
    fn retry_policy_sleeps_only_between_attempts() {
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(3), None);
    }

    #[tokio::test]
    async fn empty_path_never_exists() {
        let dir = tempdir().expect("tempdir");
        let root = MediaRoot::new(dir.path());
        assert!(!root.exists("").await);
        assert!(!root.exists("property_images/nope.jpg").await);

        std::fs::create_dir_all(dir.path().join("property_images")).expect("mkdir");
        std::fs::write(dir.path().join("property_images/yes.jpg"), b"").expect("write");
        assert!(root.exists("property_images/yes.jpg").await);
    }

    #[tokio::test]
    async fn stat_errors_are_not_reported_missing() {
        let dir = tempdir().expect("tempdir");
        let root = MediaRoot::new(dir.path());
        // A regular file where the prefix directory should be: stat fails with ENOTDIR.
        std::fs::write(dir.path().join("property_images"), b"x").expect("write");
        assert!(root.exists("property_images/any.jpg").await);
    }

    #[tokio::test]
    async fn empty_url_fails_without_network() {
        let dir = tempdir().expect("tempdir");
        let fetcher = MediaFetcher::new(&fast_config(dir.path())).expect("fetcher");
        let err = fetcher.fetch("", 1, 0).await.expect_err("empty url");
        assert!(matches!(err, MediaError::EmptyInput));
    }

    #[tokio::test]
    async fn successful_fetch_writes_relative_prefixed_file() {
        let (base, hits) = spawn_image_server().await;
        let dir = tempdir().expect("tempdir");
        let fetcher = MediaFetcher::new(&fast_config(dir.path())).expect("fetcher");

        let url = format!("{base}/media/ce5950dd-d4b0-478e-ad32-176b8900bef1/original.jpg");
        let relative = fetcher.fetch(&url, 9, 0).await.expect("fetch");

        assert_eq!(
            relative,
            "property_images/ce5950dd-d4b0-478e-ad32-176b8900bef1.jpg"
        );
        assert!(fetcher.root().exists(&relative).await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("property_images"))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let (base, hits) = spawn_image_server().await;
        let dir = tempdir().expect("tempdir");
        let fetcher = MediaFetcher::new(&fast_config(dir.path())).expect("fetcher");

        let relative = fetcher
            .fetch(&format!("{base}/flaky/original.jpg"), 3, 1)
            .await
            .expect("third attempt succeeds");
        assert!(relative.starts_with("property_images/pf_3_1_"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_error() {
        let (base, hits) = spawn_image_server().await;
        let dir = tempdir().expect("tempdir");
        let fetcher = MediaFetcher::new(&fast_config(dir.path())).expect("fetcher");

        let err = fetcher
            .fetch(&format!("{base}/missing/original.jpg"), 1, 0)
            .await
            .expect_err("404 exhausts");
        match err {
            MediaError::DownloadExhausted {
                attempts,
                last_error: FetchFailure::HttpStatus { status, .. },
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(status, 404);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_bodies_leave_no_file_behind() {
        let (base, _hits) = spawn_image_server().await;
        let dir = tempdir().expect("tempdir");
        let mut config = fast_config(dir.path());
        config.max_retries = 1;
        let fetcher = MediaFetcher::new(&config).expect("fetcher");

        let err = fetcher
            .fetch(&format!("{base}/empty/original.jpg"), 1, 0)
            .await
            .expect_err("empty body");
        assert!(matches!(
            err,
            MediaError::DownloadExhausted {
                last_error: FetchFailure::EmptyBody { .. },
                ..
            }
        ));
        let written = std::fs::read_dir(dir.path().join("property_images"))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(written, 0);
    }
}
