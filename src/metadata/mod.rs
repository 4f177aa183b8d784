use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

pub mod ytdlp;

pub use ytdlp::YtDlpTool;

use crate::{ClipperError, Result};

/// Ordered list of format identifiers, best first.
///
/// Rendered in yt-dlp's fallback syntax: `bestaudio[ext=m4a]/bestaudio/best`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatSelector(Vec<String>);

impl FormatSelector {
    pub fn new<I, S>(preferences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(preferences.into_iter().map(Into::into).collect())
    }

    pub fn preferences(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|p| p.trim().is_empty())
    }
}

impl Default for FormatSelector {
    fn default() -> Self {
        Self::new(["bestaudio[ext=m4a]", "bestaudio", "best"])
    }
}

impl fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preferences: Vec<&str> = self
            .0
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        write!(f, "{}", preferences.join("/"))
    }
}

/// Attributes the discovery tool reported for a video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    /// Direct, time-limited media URL
    #[serde(rename = "url")]
    pub direct_url: String,

    /// Duration in whole seconds if the tool reported one
    #[serde(skip)]
    pub duration: Option<u64>,

    /// Everything else the tool returned
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl VideoMetadata {
    /// Build from a decoded JSON document. The `url` field is required.
    pub fn from_json(value: Value) -> Result<Self> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(ClipperError::MetadataDecode(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let direct_url = match fields.remove("url") {
            Some(Value::String(url)) if !url.trim().is_empty() => url,
            _ => return Err(ClipperError::MetadataIncomplete("url")),
        };

        let duration = fields
            .get("duration")
            .and_then(Value::as_f64)
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d as u64);

        Ok(Self {
            direct_url,
            duration,
            fields,
        })
    }

    /// Duration in seconds, or -1 when unknown.
    pub fn duration_secs(&self) -> i64 {
        self.duration
            .and_then(|d| i64::try_from(d).ok())
            .unwrap_or(-1)
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Find the largest balanced `{...}` span in free-form text.
///
/// Braces inside JSON string literals are ignored while a candidate is open,
/// so `{"title": "a } b"}` is returned whole. A candidate that never closes,
/// for instance because of a stray quote in log noise, is skipped and the
/// scan resumes at the next brace.
pub fn find_json_object(text: &str) -> Option<&str> {
    let mut best: Option<&str> = None;
    let mut from = 0;

    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        match balanced_len(&text.as_bytes()[start..]) {
            Some(len) => {
                let candidate = &text[start..start + len];
                if best.map_or(true, |b| candidate.len() > b.len()) {
                    best = Some(candidate);
                }
                from = start + len;
            }
            None => from = start + 1,
        }
    }

    best
}

/// Length of the balanced object opening at `bytes[0]`, if it closes.
fn balanced_len(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            b'"' => in_string = true,
            _ => {}
        }
    }

    None
}

/// Parse the discovery tool's combined output into metadata.
pub fn parse_metadata(output: &str) -> Result<VideoMetadata> {
    let json = find_json_object(output).ok_or_else(|| {
        ClipperError::MetadataDecode("no JSON object found in tool output".to_string())
    })?;

    let value: Value = serde_json::from_str(json)
        .map_err(|e| ClipperError::MetadataDecode(format!("{}: {}", e, preview(json))))?;

    VideoMetadata::from_json(value)
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 120;
    match text.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Something that can describe a video as JSON amid console noise
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoveryTool: Send + Sync {
    /// Run the lookup and return the tool's combined stdout/stderr text
    async fn dump_metadata(
        &self,
        reference: &str,
        format: &FormatSelector,
        timeout: Option<Duration>,
    ) -> Result<String>;
}

enum ResolveState {
    Unresolved,
    Resolving,
    Resolved {
        reference: String,
        metadata: Arc<VideoMetadata>,
    },
    Failed {
        reference: String,
        error: ClipperError,
        attempt: u64,
    },
}

struct Slot {
    state: ResolveState,
    /// Lookups started so far; tags a failure with the attempt that produced it
    attempts: u64,
}

/// Resolves a video reference once and hands out the cached record afterwards.
///
/// Concurrent callers wait for the in-flight lookup instead of starting their
/// own and share its outcome, success or failure. No lock is held while the
/// tool runs. The record is cached for one reference at a time; asking for a
/// different one replaces it.
pub struct MetadataResolver {
    source: Arc<dyn DiscoveryTool>,
    slot: Mutex<Slot>,
    settled: Notify,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn DiscoveryTool>) -> Self {
        Self {
            source,
            slot: Mutex::new(Slot {
                state: ResolveState::Unresolved,
                attempts: 0,
            }),
            settled: Notify::new(),
        }
    }

    /// Resolve `reference`, or return the cached record.
    ///
    /// A failed lookup is not cached: callers that were waiting on it get the
    /// same error, and the next fresh call runs the tool again.
    pub async fn resolve(
        &self,
        reference: &str,
        format: &FormatSelector,
        timeout: Option<Duration>,
    ) -> Result<Arc<VideoMetadata>> {
        let mut awaited = None;

        let attempt = loop {
            let notified = {
                let mut slot = self.lock_slot();
                let busy = match &slot.state {
                    ResolveState::Resolved {
                        reference: cached,
                        metadata,
                    } if cached == reference => return Ok(Arc::clone(metadata)),
                    ResolveState::Failed {
                        reference: failed,
                        error,
                        attempt,
                    } if failed == reference => {
                        if awaited == Some(*attempt) {
                            return Err(error.replay());
                        }
                        tracing::debug!("Retrying metadata lookup after earlier failure: {}", error);
                        false
                    }
                    ResolveState::Resolving => true,
                    _ => false,
                };

                if !busy {
                    slot.attempts += 1;
                    slot.state = ResolveState::Resolving;
                    break slot.attempts;
                }

                awaited = Some(slot.attempts);
                self.settled.notified()
            };

            notified.await;
        };

        let guard = InFlight {
            resolver: self,
            settled: false,
        };

        match self.fetch(reference, format, timeout).await {
            Ok(metadata) => {
                let metadata = Arc::new(metadata);
                guard.settle(ResolveState::Resolved {
                    reference: reference.to_string(),
                    metadata: Arc::clone(&metadata),
                });
                Ok(metadata)
            }
            Err(e) => {
                guard.settle(ResolveState::Failed {
                    reference: reference.to_string(),
                    error: e.replay(),
                    attempt,
                });
                Err(e)
            }
        }
    }

    async fn fetch(
        &self,
        reference: &str,
        format: &FormatSelector,
        timeout: Option<Duration>,
    ) -> Result<VideoMetadata> {
        tracing::debug!("Resolving metadata for {} with format {}", reference, format);

        let output = self.source.dump_metadata(reference, format, timeout).await?;
        let metadata = parse_metadata(&output)?;

        tracing::info!(
            "Resolved {} (duration: {}s)",
            metadata.title().unwrap_or(reference),
            metadata.duration_secs()
        );

        Ok(metadata)
    }

    /// The cached record, if resolution already succeeded.
    pub fn cached(&self) -> Option<Arc<VideoMetadata>> {
        match &self.lock_slot().state {
            ResolveState::Resolved { metadata, .. } => Some(Arc::clone(metadata)),
            _ => None,
        }
    }

    /// Forget any cached record.
    pub fn invalidate(&self) {
        self.store(ResolveState::Unresolved);
    }

    fn store(&self, next: ResolveState) {
        self.lock_slot().state = next;
        self.settled.notify_waiters();
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Puts the resolver back to `Unresolved` if a lookup is abandoned mid-flight.
struct InFlight<'a> {
    resolver: &'a MetadataResolver,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, next: ResolveState) {
        self.resolver.store(next);
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.resolver.store(ResolveState::Unresolved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE: &str = r#"https://rr1.example.com/videoplayback?id=1
{"id": "abc123", "title": "Talk {part 1}", "duration": 212.4, "url": "https://rr1.example.com/videoplayback?id=1", "ext": "m4a"}"#;

    #[test]
    fn test_format_selector_renders_fallbacks() {
        assert_eq!(
            FormatSelector::default().to_string(),
            "bestaudio[ext=m4a]/bestaudio/best"
        );
        assert_eq!(FormatSelector::new(["22"]).to_string(), "22");
        assert!(FormatSelector::new([" ", ""]).is_empty());
    }

    #[test]
    fn test_find_json_object_prefers_largest() {
        let text = r#"[info] {noise} downloading {"a": {"b": 1}, "c": "}"} trailing {x}"#;
        assert_eq!(find_json_object(text), Some(r#"{"a": {"b": 1}, "c": "}"}"#));
    }

    #[test]
    fn test_find_json_object_none() {
        assert_eq!(find_json_object("no braces here"), None);
        assert_eq!(find_json_object("{ unterminated"), None);
    }

    #[test]
    fn test_unclosed_noise_does_not_hide_object() {
        let text = "WARNING: {\"unterminated} noise\n{\"url\": \"https://m/a\"}";
        assert_eq!(find_json_object(text), Some(r#"{"url": "https://m/a"}"#));

        let metadata = parse_metadata(text).unwrap();
        assert_eq!(metadata.direct_url, "https://m/a");
    }

    #[test]
    fn test_parse_metadata() {
        let metadata = parse_metadata(SAMPLE).unwrap();

        assert_eq!(metadata.direct_url, "https://rr1.example.com/videoplayback?id=1");
        assert_eq!(metadata.duration, Some(212));
        assert_eq!(metadata.title(), Some("Talk {part 1}"));
        assert_eq!(metadata.field("ext"), Some(&Value::from("m4a")));
    }

    #[test]
    fn test_unknown_duration_is_minus_one() {
        let metadata = parse_metadata(r#"{"url": "https://x.example/v"}"#).unwrap();
        assert_eq!(metadata.duration_secs(), -1);
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let err = parse_metadata("WARNING: {\"url\": \"https://x\", }").unwrap_err();
        assert!(matches!(err, ClipperError::MetadataDecode(_)));

        let err = parse_metadata("ERROR: nothing to see").unwrap_err();
        assert!(matches!(err, ClipperError::MetadataDecode(_)));
    }

    #[test]
    fn test_missing_url_is_incomplete() {
        let err = parse_metadata(r#"{"id": "abc", "duration": 10}"#).unwrap_err();
        assert!(matches!(err, ClipperError::MetadataIncomplete("url")));

        let err = parse_metadata(r#"{"url": ""}"#).unwrap_err();
        assert!(matches!(err, ClipperError::MetadataIncomplete("url")));
    }

    #[tokio::test]
    async fn test_resolve_runs_tool_once() {
        let mut tool = MockDiscoveryTool::new();
        tool.expect_dump_metadata()
            .with(eq("abc123"), eq(FormatSelector::default()), eq(None::<Duration>))
            .times(1)
            .returning(|_, _, _| Ok(SAMPLE.to_string()));

        let resolver = MetadataResolver::new(Arc::new(tool));
        let format = FormatSelector::default();

        let first = resolver.resolve("abc123", &format, None).await.unwrap();
        let second = resolver.resolve("abc123", &format, None).await.unwrap();

        assert_eq!(first.direct_url, "https://rr1.example.com/videoplayback?id=1");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(resolver.cached().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_lookup() {
        let mut tool = MockDiscoveryTool::new();
        tool.expect_dump_metadata()
            .times(2)
            .returning(|_, _, _| Ok(SAMPLE.to_string()));

        let resolver = MetadataResolver::new(Arc::new(tool));
        let format = FormatSelector::default();

        resolver.resolve("abc123", &format, None).await.unwrap();
        resolver.invalidate();
        assert!(resolver.cached().is_none());
        resolver.resolve("abc123", &format, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_is_keyed_by_reference() {
        let mut tool = MockDiscoveryTool::new();
        tool.expect_dump_metadata()
            .times(3)
            .returning(|reference, _, _| Ok(format!(r#"{{"url": "https://media/{}"}}"#, reference)));

        let resolver = MetadataResolver::new(Arc::new(tool));
        let format = FormatSelector::default();

        let a = resolver.resolve("aaa", &format, None).await.unwrap();
        let b = resolver.resolve("bbb", &format, None).await.unwrap();
        assert_eq!(a.direct_url, "https://media/aaa");
        assert_eq!(b.direct_url, "https://media/bbb");

        let cached = resolver.resolve("bbb", &format, None).await.unwrap();
        assert!(Arc::ptr_eq(&b, &cached));

        let again = resolver.resolve("aaa", &format, None).await.unwrap();
        assert_eq!(again.direct_url, "https://media/aaa");
    }

    #[tokio::test]
    async fn test_failed_lookup_is_not_cached() {
        let mut tool = MockDiscoveryTool::new();
        let mut calls = 0;
        tool.expect_dump_metadata().times(2).returning(move |_, _, _| {
            calls += 1;
            if calls == 1 {
                Ok(r#"{"id": "abc"}"#.to_string())
            } else {
                Ok(SAMPLE.to_string())
            }
        });

        let resolver = MetadataResolver::new(Arc::new(tool));
        let format = FormatSelector::default();

        let err = resolver.resolve("abc", &format, None).await.unwrap_err();
        assert!(matches!(err, ClipperError::MetadataIncomplete(_)));
        assert!(resolver.cached().is_none());

        assert!(resolver.resolve("abc", &format, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_tool_failure_propagates() {
        let mut tool = MockDiscoveryTool::new();
        tool.expect_dump_metadata().returning(|_, _, _| {
            Err(ClipperError::ToolExecution {
                tool: "yt-dlp".to_string(),
                code: Some(1),
                stderr: "ERROR: Video unavailable".to_string(),
            })
        });

        let resolver = MetadataResolver::new(Arc::new(tool));
        let err = resolver
            .resolve("gone", &FormatSelector::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ClipperError::ToolExecution { code: Some(1), .. }));
    }

    struct SlowTool {
        calls: AtomicUsize,
        fail: bool,
    }

    impl SlowTool {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl DiscoveryTool for SlowTool {
        async fn dump_metadata(
            &self,
            _reference: &str,
            _format: &FormatSelector,
            _timeout: Option<Duration>,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(ClipperError::ToolExecution {
                    tool: "yt-dlp".to_string(),
                    code: Some(1),
                    stderr: "ERROR: Video unavailable".to_string(),
                });
            }
            Ok(SAMPLE.to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_lookup() {
        let tool = SlowTool::new(false);
        let resolver = MetadataResolver::new(tool.clone());
        let format = FormatSelector::default();

        let (a, b, c) = tokio::join!(
            resolver.resolve("abc123", &format, None),
            resolver.resolve("abc123", &format, None),
            resolver.resolve("abc123", &format, None),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let tool = SlowTool::new(true);
        let resolver = MetadataResolver::new(tool.clone());
        let format = FormatSelector::default();

        let (a, b, c) = tokio::join!(
            resolver.resolve("bad", &format, None),
            resolver.resolve("bad", &format, None),
            resolver.resolve("bad", &format, None),
        );

        for result in [a, b, c] {
            assert!(matches!(
                result,
                Err(ClipperError::ToolExecution { code: Some(1), .. })
            ));
        }
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);

        assert!(resolver.resolve("bad", &format, None).await.is_err());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_lookup_resets_state() {
        let tool = SlowTool::new(false);
        let resolver = MetadataResolver::new(tool.clone());
        let format = FormatSelector::default();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            resolver.resolve("abc123", &format, None),
        )
        .await;
        assert!(abandoned.is_err());

        assert!(resolver.resolve("abc123", &format, None).await.is_ok());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }
}
