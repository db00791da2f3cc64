//! Prompt-cache simulator (component C4).
//!
//! No upstream cache is ever called. This module models Anthropic's
//! `ephemeral` cache_control accounting purely in-process, so that clients
//! see believable `cache_creation_input_tokens` / `cache_read_input_tokens`
//! numbers regardless of which channel actually served the request.

use std::collections::HashMap;
use std::sync::Mutex;

use llmrelay_core::content::MessageContent;
use llmrelay_core::request::CanonicalClaudeRequest;
use sha2::{Digest, Sha256};

/// Concatenate every `cache_control: ephemeral` segment in a request, system
/// blocks first then message blocks in order, matching the order the
/// upstream provider would see them rendered in. Text blocks contribute
/// their literal text; image, tool_use and tool_result blocks have no
/// natural text form, so they contribute a stable canonical JSON
/// serialization instead.
///
/// Returns `None` if the request carries no cacheable content, so callers can
/// pass it straight through to [`PromptCacheSimulator::record_access`].
#[must_use]
pub fn extract_cacheable_text(req: &CanonicalClaudeRequest) -> Option<String> {
    let mut segments: Vec<String> = Vec::new();

    if let Some(system) = &req.system {
        segments.extend(system.cacheable_segments().into_iter().map(str::to_owned));
    }

    for message in &req.messages {
        let MessageContent::Blocks(blocks) = &message.content else { continue };
        for block in blocks {
            if block.is_cacheable() {
                match block.as_text() {
                    Some(text) => segments.push(text.to_owned()),
                    None => segments.push(block.canonical_json()),
                }
            }
        }
    }

    if segments.is_empty() { None } else { Some(segments.concat()) }
}

/// Default sliding TTL against `last_accessed`, in seconds.
pub const DEFAULT_TTL_SECONDS: u64 = llmrelay_core::constants::DEFAULT_CACHE_TTL_SECS;
/// Minimum configurable TTL.
pub const MIN_TTL_SECONDS: u64 = 60;
/// Maximum configurable TTL.
pub const MAX_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Default entry cap.
pub const DEFAULT_MAX_ENTRIES: usize = 5000;
/// Minimum configurable entry cap.
pub const MIN_MAX_ENTRIES: usize = 100;
/// Maximum configurable entry cap.
pub const MAX_MAX_ENTRIES: usize = 100_000;

/// Fraction of entries evicted on a routine (full-cache) eviction pass.
const ROUTINE_EVICTION_FRACTION: f64 = 0.10;
/// Fraction of entries evicted on an emergency cleanup.
const EMERGENCY_EVICTION_FRACTION: f64 = 0.50;

/// The `(cache_creation, cache_read)` token pair carried into `message_start`
/// usage and `message_delta` usage by the SSE re-serializer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheAccounting {
    /// Tokens simulated as newly written to cache.
    pub creation: u64,
    /// Tokens simulated as served from cache.
    pub read: u64,
}

/// Read-only hit/miss/eviction counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hit_count: u64,
    /// Number of cache misses (including collisions, which count as a miss).
    pub miss_count: u64,
    /// Number of entries evicted (TTL, capacity, or emergency).
    pub eviction_count: u64,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or `0.0` if nothing has been recorded yet.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 { 0.0 } else { self.hit_count as f64 / total as f64 }
    }
}

struct CacheEntry {
    content_length: usize,
    token_count: u64,
    last_accessed_ms: i64,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Configuration for [`PromptCacheSimulator`].
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// Sliding TTL in seconds, clamped to `[MIN_TTL_SECONDS, MAX_TTL_SECONDS]`.
    pub ttl_seconds: u64,
    /// Maximum resident entries, clamped to `[MIN_MAX_ENTRIES, MAX_MAX_ENTRIES]`.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: DEFAULT_TTL_SECONDS, max_entries: DEFAULT_MAX_ENTRIES }
    }
}

impl CacheConfig {
    fn clamped(self) -> Self {
        Self {
            ttl_seconds: self.ttl_seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS),
            max_entries: self.max_entries.clamp(MIN_MAX_ENTRIES, MAX_MAX_ENTRIES),
        }
    }
}

/// Process-wide, thread-safe prompt-cache simulator.
pub struct PromptCacheSimulator {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl PromptCacheSimulator {
    /// Build a simulator with `config`, clamping out-of-range values.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: config.clamped(),
            state: Mutex::new(CacheState { entries: HashMap::new(), stats: CacheStats::default() }),
        }
    }

    /// Estimate a token count from cacheable text: `max(1, chars/4)`.
    #[must_use]
    pub fn estimate_tokens(text: &str) -> u64 {
        (text.chars().count() / 4).max(1) as u64
    }

    /// Record an access for `cacheable_text` (the concatenation of all
    /// `cache_control: ephemeral` blocks for this request, or `None`/empty if
    /// the request carries no cacheable content) and return the accounting
    /// pair to report on this request.
    pub fn record_access(&self, cacheable_text: Option<&str>, now_ms: i64) -> CacheAccounting {
        let Some(text) = cacheable_text.filter(|t| !t.is_empty()) else {
            return CacheAccounting::default();
        };

        let content_length = text.len();
        let token_count = Self::estimate_tokens(text);
        let key = cache_key(text, content_length);

        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(entry) = state.entries.get_mut(&key) {
            if entry.content_length == content_length {
                entry.last_accessed_ms = now_ms;
                state.stats.hit_count += 1;
                return CacheAccounting { creation: 0, read: token_count };
            }
            // Same key, different length: SHA-256 collision. Treat as a miss
            // and overwrite below.
        }

        state.stats.miss_count += 1;
        self.evict_if_needed(&mut state, now_ms);
        state
            .entries
            .insert(key, CacheEntry { content_length, token_count, last_accessed_ms: now_ms });
        CacheAccounting { creation: token_count, read: 0 }
    }

    /// Routine TTL + capacity sweep. Intended to be called periodically by a
    /// background task; also invoked inline before an insert that would
    /// overflow `max_entries`.
    pub fn cleanup(&self, now_ms: i64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.evict_expired(&mut state, now_ms);
    }

    /// Evict `EMERGENCY_EVICTION_FRACTION` of resident entries regardless of
    /// TTL or capacity, for use when a memory-pressure threshold is crossed.
    pub fn emergency_cleanup(&self, now_ms: i64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.evict_expired(&mut state, now_ms);
        self.evict_fraction(&mut state, EMERGENCY_EVICTION_FRACTION);
    }

    /// Current hit/miss/eviction counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).stats
    }

    fn evict_if_needed(&self, state: &mut CacheState, now_ms: i64) {
        self.evict_expired(state, now_ms);
        if state.entries.len() >= self.config.max_entries {
            self.evict_fraction(state, ROUTINE_EVICTION_FRACTION);
        }
    }

    fn evict_expired(&self, state: &mut CacheState, now_ms: i64) {
        let ttl_ms = i64::try_from(self.config.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let before = state.entries.len();
        state.entries.retain(|_, entry| now_ms.saturating_sub(entry.last_accessed_ms) < ttl_ms);
        let evicted = before - state.entries.len();
        state.stats.eviction_count += evicted as u64;
    }

    /// Evict the oldest `fraction` of entries, ties broken by smaller
    /// `token_count` first.
    fn evict_fraction(&self, state: &mut CacheState, fraction: f64) {
        let to_evict = ((state.entries.len() as f64) * fraction).ceil() as usize;
        if to_evict == 0 {
            return;
        }
        let mut keys: Vec<(String, i64, u64)> = state
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.last_accessed_ms, v.token_count))
            .collect();
        keys.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
        for (key, _, _) in keys.into_iter().take(to_evict) {
            state.entries.remove(&key);
        }
        state.stats.eviction_count += to_evict as u64;
    }
}

fn cache_key(text: &str, content_length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    format!("{}:{content_length}", hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
