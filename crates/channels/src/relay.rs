use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio::time::Instant;

/// Reply format a human uses to hand over a one-time code.
pub const CODE_PATTERN: &str = r"^/code\s+(\d{6,8})$";

static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(CODE_PATTERN).expect("valid code pattern"));

/// Extract the digits from a `/code 123456` reply. Surrounding whitespace is
/// ignored; anything else is not a code.
pub fn match_code(text: &str) -> Option<String> {
    CODE_RE
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Out-of-band channel to the human operator.
///
/// Notifications are fire-and-forget: implementations swallow and log their
/// own failures so alerting can never break a login run.
#[async_trait]
pub trait VerificationRelay: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn notify(&self, text: &str);

    async fn notify_with_image(&self, path: &Path, caption: &str);

    /// Wait until `deadline` for a code reply from the configured recipient.
    /// `None` means nobody answered in time.
    async fn request_code(&self, deadline: Instant) -> Option<String>;
}

/// Used when no bot token / recipient is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRelay;

#[async_trait]
impl VerificationRelay for DisabledRelay {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn notify(&self, _text: &str) {}

    async fn notify_with_image(&self, _path: &Path, _caption: &str) {}

    async fn request_code(&self, _deadline: Instant) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_match_code_accepts_six_to_eight_digits() {
        assert_eq!(match_code("/code 123456").as_deref(), Some("123456"));
        assert_eq!(match_code("  /code   12345678 \n").as_deref(), Some("12345678"));
        assert_eq!(match_code("/code\t7654321").as_deref(), Some("7654321"));
    }

    #[test]
    fn test_match_code_rejects_other_text() {
        assert!(match_code("/code 12345").is_none());
        assert!(match_code("/code 123456789").is_none());
        assert!(match_code("code 123456").is_none());
        assert!(match_code("/code 123456 please").is_none());
        assert!(match_code("/code abcdef").is_none());
        assert!(match_code("").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_relay_returns_immediately() {
        let relay = DisabledRelay;
        let start = Instant::now();
        let code = relay.request_code(start + Duration::from_secs(120)).await;
        assert!(code.is_none());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!relay.is_enabled());
    }
}
