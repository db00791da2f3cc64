//! Stream pipeline helpers shared by the provider channel crates.
//!
//! Every channel follows the same shape: parse SSE lines, deserialize each
//! line's JSON into a provider-native event type, and feed it through a
//! per-channel handler that emits zero or more [`ProviderStreamEvent`]s. This
//! module factors out everything except that handler.

use futures::stream::{self, StreamExt};
use llmrelay_core::events::ProviderStreamEvent;
use tracing::warn;

use crate::provider::{ProviderError, ProviderEventStream};
use crate::sse::{SseParserOptions, parse_sse_lines};

/// Convert an HTTP response's SSE byte stream into a typed [`ProviderEventStream`].
///
/// `handler` is called once per successfully-deserialized SSE line with a
/// `&mut S` carrying whatever per-stream state the channel needs (open
/// segment indices, accumulated tool-call arguments, etc).
pub fn sse_to_event_stream<E, S, H>(
    response: reqwest::Response,
    options: &'static SseParserOptions,
    initial_state: S,
    mut handler: H,
) -> ProviderEventStream
where
    E: serde::de::DeserializeOwned + Send + 'static,
    S: Send + 'static,
    H: FnMut(&E, &mut S) -> Vec<ProviderStreamEvent> + Send + 'static,
{
    let byte_stream = response.bytes_stream();
    let sse_lines = parse_sse_lines(byte_stream, options);

    let event_stream = sse_lines
        .scan(initial_state, move |state, line| {
            let event: E = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(e) => {
                    warn!(line = %line, error = %e, "Failed to parse SSE event");
                    return std::future::ready(Some(vec![]));
                }
            };
            let events = handler(&event, state);
            std::future::ready(Some(events))
        })
        .flat_map(stream::iter)
        .map(Ok::<ProviderStreamEvent, ProviderError>);

    Box::pin(event_stream)
}
