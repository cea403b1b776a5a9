use clawkeeper_core::{PageState, TwoFactorMethod};
use url::Url;

const GITHUB_HOST: &str = "github.com";

/// Content markers of the console's unauthenticated landing page.
const SIGNIN_MARKERS: [&str; 2] = ["sign in with github", "continue with github"];

/// Maps what the browser shows to a [`PageState`].
///
/// Pure and total: the same `(location, content)` always yields the same
/// state, and anything unrecognised is `Unknown`.
#[derive(Debug, Clone)]
pub struct PageClassifier {
    console_domain: String,
}

impl PageClassifier {
    pub fn new(console_domain: &str) -> Self {
        Self {
            console_domain: console_domain.trim().trim_start_matches('.').to_lowercase(),
        }
    }

    pub fn classify(&self, location: &str, content: &str) -> PageState {
        let Ok(url) = Url::parse(location.trim()) else {
            return PageState::Unknown;
        };
        let Some(host) = url.host_str().map(|h| h.to_lowercase()) else {
            return PageState::Unknown;
        };
        let path = url.path().to_lowercase();

        if is_github_host(&host) {
            classify_github(&path)
        } else if self.is_console_host(&host) {
            classify_console(&path, content)
        } else {
            PageState::Unknown
        }
    }

    fn is_console_host(&self, host: &str) -> bool {
        !self.console_domain.is_empty()
            && (host == self.console_domain || host.ends_with(&format!(".{}", self.console_domain)))
    }
}

fn is_github_host(host: &str) -> bool {
    host == GITHUB_HOST || host == "www.github.com"
}

fn classify_github(path: &str) -> PageState {
    if path.contains("two-factor") {
        let method = if path.contains("two-factor/mobile") {
            TwoFactorMethod::MobilePush
        } else {
            TwoFactorMethod::CodeEntry
        };
        return PageState::GithubTwoFactor(method);
    }
    // `/sessions/verified-device` would otherwise read as a login form
    if path.contains("verified-device") || path.contains("device-verification") {
        return PageState::GithubDeviceVerification;
    }
    let trimmed = path.trim_end_matches('/');
    if matches!(trimmed, "/login" | "/session" | "/sessions") {
        return PageState::GithubLogin;
    }
    if path.contains("/login/oauth/authorize") {
        return PageState::GithubOAuthAuthorize;
    }
    PageState::GithubOther
}

fn classify_console(path: &str, content: &str) -> PageState {
    if path.contains("/callback") {
        return PageState::OAuthCallback;
    }
    if path.contains("/signin") {
        return PageState::Signin;
    }
    let content = content.to_lowercase();
    if SIGNIN_MARKERS.iter().any(|marker| content.contains(marker)) {
        return PageState::Signin;
    }
    PageState::AuthenticatedConsole
}

pub fn is_two_factor_location(location: &str) -> bool {
    location.to_lowercase().contains("two-factor")
}

pub fn is_device_verification_location(location: &str) -> bool {
    let location = location.to_lowercase();
    location.contains("verified-device") || location.contains("device-verification")
}
