//! Usage-tracker wiring (component C9 integration).
//!
//! Wraps a channel's [`ProviderEventStream`] so that, once the stream
//! finishes, one `UsageRow` is appended via [`UsageStore::record`] and the
//! account's success/failure is reported to [`Distributor::record_usage`].
//! Nothing is written for a stream that errors mid-flight — partial
//! UsageRows are never persisted.

use async_stream::stream;
use llmrelay_accounts::{Distributor, UsageStore};
use llmrelay_core::events::ProviderStreamEvent;
use llmrelay_core::ids::RequestId;
use llmrelay_providers::provider::{ProviderEventStream, ProviderError};
use std::sync::Arc;
use tracing::warn;

/// Identifies the call being tracked, fixed for the lifetime of one request.
#[derive(Clone, Debug)]
pub struct UsageContext {
    /// Account the call was made against.
    pub account_id: String,
    /// Channel name (`amazonq`, `gemini`, `custom_api`).
    pub channel: String,
    /// Post-mapping model id actually sent upstream.
    pub model: String,
}

/// Wrap `inner` so that on clean completion it records a usage row and
/// reports success to the distributor; on a mid-stream error it reports
/// failure and records nothing.
pub fn track_usage(
    inner: ProviderEventStream,
    distributor: Arc<Distributor>,
    usage: Arc<UsageStore>,
    ctx: UsageContext,
    now_ms: i64,
) -> ProviderEventStream {
    use futures::StreamExt;

    let wrapped = stream! {
        let mut inner = std::pin::pin!(inner);
        let mut final_usage = llmrelay_core::events::Usage::default();
        let mut saw_error = false;

        while let Some(item) = inner.next().await {
            if let Ok(ProviderStreamEvent::MessageDelta { usage: u, .. }) = &item {
                final_usage = u.clone();
            }
            if item.is_err() {
                saw_error = true;
            }
            yield item;
        }

        distributor.record_usage(&ctx.account_id, !saw_error, now_ms);

        if !saw_error {
            let request_id = RequestId::new();
            let now_iso = chrono::DateTime::from_timestamp_millis(now_ms)
                .unwrap_or_else(chrono::Utc::now)
                .to_rfc3339();
            if let Err(err) = usage.record(
                request_id.as_str(),
                &ctx.account_id,
                &ctx.channel,
                &ctx.model,
                i64::from(final_usage.input_tokens.unwrap_or(0)),
                i64::from(final_usage.output_tokens.unwrap_or(0)),
                i64::from(final_usage.cache_creation_input_tokens.unwrap_or(0)),
                i64::from(final_usage.cache_read_input_tokens.unwrap_or(0)),
                &now_iso,
            ) {
                warn!(error = %err, account_id = %ctx.account_id, "failed to record usage row");
            }
        }
    };

    Box::pin(wrapped.map(|item: Result<ProviderStreamEvent, ProviderError>| item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use llmrelay_accounts::AccountStore;
    use llmrelay_core::events::{MessageDeltaPayload, StopReason, Usage};

    fn ctx() -> UsageContext {
        UsageContext { account_id: "acct_1".into(), channel: "amazonq".into(), model: "claude".into() }
    }

    #[tokio::test]
    async fn successful_stream_records_one_usage_row() {
        let store = AccountStore::open_in_memory().unwrap();
        let distributor = Arc::new(Distributor::new(store.clone()));
        let usage_store = Arc::new(UsageStore::new(store).unwrap());

        let events: Vec<Result<ProviderStreamEvent, ProviderError>> = vec![
            Ok(ProviderStreamEvent::MessageDelta {
                delta: MessageDeltaPayload { stop_reason: StopReason::EndTurn, stop_sequence: None },
                usage: Usage { input_tokens: Some(10), output_tokens: Some(5), cache_creation_input_tokens: None, cache_read_input_tokens: None },
            }),
            Ok(ProviderStreamEvent::MessageStop),
        ];
        let inner: ProviderEventStream = Box::pin(futures::stream::iter(events));

        let tracked = track_usage(inner, distributor, usage_store.clone(), ctx(), 0);
        let collected: Vec<_> = tracked.collect().await;
        assert_eq!(collected.len(), 2);

        let summary = usage_store
            .summarize(llmrelay_accounts::UsageWindow::All, llmrelay_accounts::UsageGroupBy::All, "1970-01-01T00:00:00Z")
            .unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].input_tokens, 10);
    }

    #[tokio::test]
    async fn errored_stream_records_nothing() {
        let store = AccountStore::open_in_memory().unwrap();
        let distributor = Arc::new(Distributor::new(store.clone()));
        let usage_store = Arc::new(UsageStore::new(store).unwrap());

        let events: Vec<Result<ProviderStreamEvent, ProviderError>> =
            vec![Err(ProviderError::Other { message: "boom".into() })];
        let inner: ProviderEventStream = Box::pin(futures::stream::iter(events));

        let tracked = track_usage(inner, distributor, usage_store.clone(), ctx(), 0);
        let _: Vec<_> = tracked.collect().await;

        let summary = usage_store
            .summarize(llmrelay_accounts::UsageWindow::All, llmrelay_accounts::UsageGroupBy::All, "1970-01-01T00:00:00Z")
            .unwrap();
        assert!(summary.is_empty());
    }
}
