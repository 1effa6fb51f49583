//! Log output setup.
//!
//! Logs go to stderr so that command output on stdout stays clean. `RUST_LOG`
//! overrides the configured level when set.

use anyhow::Result;
use std::io;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `format` is `"console"` or `"json"`.
pub fn init(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    let installed = match format {
        "json" => builder.json().try_init(),
        _ => builder.with_target(false).try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}

/// Keep the first and last two characters of a key, e.g. `ab***yz`.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}***{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("abcdef123456xyz"), "ab***yz");
        assert_eq!(mask_api_key("abcde"), "ab***de");
        assert_eq!(mask_api_key("abcd"), "****");
        assert_eq!(mask_api_key(""), "****");
    }

    #[test]
    fn test_mask_never_contains_middle() {
        let masked = mask_api_key("0123456789secret9876543210");
        assert!(!masked.contains("secret"));
    }
}
