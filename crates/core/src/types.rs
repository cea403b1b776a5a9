use serde::{Deserialize, Serialize};
use std::fmt;

/// How GitHub asks for the second factor on the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    /// Approve the sign-in from the GitHub mobile app.
    MobilePush,
    /// Type a TOTP / SMS code into the page.
    CodeEntry,
}

impl TwoFactorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MobilePush => "mobile_push",
            Self::CodeEntry => "code_entry",
        }
    }
}

/// Discrete tag for whatever the browser is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Signin,
    GithubLogin,
    GithubOAuthAuthorize,
    GithubTwoFactor(TwoFactorMethod),
    GithubDeviceVerification,
    GithubOther,
    OAuthCallback,
    AuthenticatedConsole,
    Unknown,
}

impl PageState {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Signin => "signin",
            Self::GithubLogin => "github_login",
            Self::GithubOAuthAuthorize => "github_oauth_authorize",
            Self::GithubTwoFactor(_) => "github_two_factor",
            Self::GithubDeviceVerification => "github_device_verification",
            Self::GithubOther => "github_other",
            Self::OAuthCallback => "oauth_callback",
            Self::AuthenticatedConsole => "authenticated_console",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_github(&self) -> bool {
        matches!(
            self,
            Self::GithubLogin
                | Self::GithubOAuthAuthorize
                | Self::GithubTwoFactor(_)
                | Self::GithubDeviceVerification
                | Self::GithubOther
        )
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GithubTwoFactor(method) => write!(f, "{}({})", self.tag(), method.as_str()),
            _ => f.write_str(self.tag()),
        }
    }
}

/// Opaque GitHub session token (`user_session` cookie value).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns `None` for blank input so an empty env var counts as absent.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Log-safe rendering: first 15 and last 8 characters.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 23 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..15].iter().collect();
        let tail: String = chars[chars.len() - 8..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}
