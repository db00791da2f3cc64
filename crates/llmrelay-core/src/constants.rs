//! Package-level and protocol-level constants.

/// Current crate version (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "llmrelay";

/// Default extended-thinking token budget when the client enables thinking
/// without an explicit `budget_tokens` (matches CodeWhisperer's fixed
/// interleaved-thinking budget).
pub const DEFAULT_THINKING_BUDGET_TOKENS: u32 = 16_000;

/// CodeWhisperer truncates tool descriptions past this many characters.
pub const MAX_TOOL_DESCRIPTION_CHARS: usize = 10_240;

/// Default prompt-cache entry sliding time-to-live (see the prompt-cache
/// simulator in `llmrelay-providers::cache`), configurable 60s-7d.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Default cooldown applied to an account after a rate-limit response.
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;

/// Maximum number of accounts the router will switch through for a single
/// request before giving up with `NoAccountAvailable`.
pub const MAX_ACCOUNT_SWITCHES: u32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn version_matches_cargo_toml() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn name_is_lowercase() {
        assert_eq!(NAME, NAME.to_lowercase());
    }
}
