//! # llmrelay-core
//!
//! Foundation types, errors, branded IDs, and retry helpers shared by every
//! other crate in the proxy.
//!
//! - **Branded IDs**: [`ids::RequestId`], [`ids::AccountId`], [`ids::AuthFlowId`],
//!   [`ids::ToolCallId`], [`ids::AdminSessionId`] as newtypes for type safety.
//! - **Content blocks**: [`content::ContentBlock`] mirroring the Anthropic
//!   `/v1/messages` wire format byte-for-byte.
//! - **Canonical request**: [`request::CanonicalClaudeRequest`], the shape every
//!   client request is parsed into before provider translation.
//! - **Stream events**: [`events::ProviderStreamEvent`], the pivot type every
//!   provider translator produces and the SSE re-serializer consumes.
//! - **Errors**: [`errors::ProxyError`] hierarchy via `thiserror`.
//! - **Retry**: [`retry::RetryConfig`] and exponential-backoff helpers.

#![deny(unsafe_code)]

pub mod constants;
pub mod content;
pub mod errors;
pub mod events;
pub mod ids;
pub mod request;
pub mod retry;

pub use content::{
    CacheControl, ContentBlock, MessageContent, Source, SystemBlock, SystemPrompt,
    ToolResultBlock, ToolResultValue,
};
pub use errors::{ErrorCollector, PersistenceError, PersistenceOperation, ProxyError};
pub use events::{
    ContentBlockDelta, ContentBlockStart, MessageDeltaPayload, MessageStartEnvelope,
    ProviderStreamEvent, StopReason, StreamErrorPayload, Usage,
};
pub use ids::{AccountId, AdminSessionId, AuthFlowId, RequestId, ToolCallId};
pub use request::{CanonicalClaudeRequest, ClaudeMessage, Role, ThinkingConfig, ToolDefinition};
