//! URL resolution and per-URL navigation strategy heuristics.
//!
//! Three profiles exist:
//!
//! | Profile    | Wait for            | Timeout | Fallback                     |
//! |------------|---------------------|---------|------------------------------|
//! | `Auth`     | full load           | 60 s    | none                         |
//! | `NeverIdle`| DOM ready           | 15 s    | none                         |
//! | `Standard` | full load           | 30 s    | one retry waiting DOM ready  |
//!
//! Dashboard-style pages poll in the background forever and never finish
//! loading every sub-resource, so waiting for a full load on them would always
//! time out.

use std::time::Duration;

use url::Url;

/// The page every transition through a blank intermediate uses.
pub const BLANK_URL: &str = "about:blank";

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// The `load` event (all sub-resources fetched).
    Load,
    /// `DOMContentLoaded` only.
    DomContentLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Auth,
    NeverIdle,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationProfile {
    pub kind: ProfileKind,
    pub wait: WaitStrategy,
    pub timeout: Duration,
    /// Strategy for the single retry after a timeout.
    pub fallback: Option<WaitStrategy>,
}

const AUTH_HOSTS: &[&str] = &[
    "accounts.google.com",
    "login.microsoftonline.com",
    "login.live.com",
    "okta.com",
    "auth0.com",
    "onelogin.com",
];

const AUTH_PATH_MARKERS: &[&str] = &["/login", "/signin", "/oauth", "/sso", "/saml"];

const NEVER_IDLE_MARKERS: &[&str] = &[
    "grafana",
    "kibana",
    "datadoghq",
    "app.powerbi.com",
    "tableau",
    "lookerstudio",
    "/dashboard",
    "/d/",
];

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".m4v", ".mkv", ".m3u8", ".ogv"];

const VIDEO_HOSTS: &[&str] = &["youtube.com", "youtu.be", "vimeo.com"];

/// Picks the wait strategy and timeout for `url`.
pub fn profile_for(url: &Url) -> NavigationProfile {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let path = url.path().to_ascii_lowercase();

    let is_auth = AUTH_HOSTS.iter().any(|h| host == *h || host.ends_with(&format!(".{h}")))
        || AUTH_PATH_MARKERS.iter().any(|m| path.starts_with(m));
    if is_auth {
        return NavigationProfile {
            kind: ProfileKind::Auth,
            wait: WaitStrategy::Load,
            timeout: Duration::from_secs(60),
            fallback: None,
        };
    }

    let haystack = format!("{host}{path}");
    if NEVER_IDLE_MARKERS.iter().any(|m| haystack.contains(m)) {
        return NavigationProfile {
            kind: ProfileKind::NeverIdle,
            wait: WaitStrategy::DomContentLoaded,
            timeout: Duration::from_secs(15),
            fallback: None,
        };
    }

    NavigationProfile {
        kind: ProfileKind::Standard,
        wait: WaitStrategy::Load,
        timeout: Duration::from_secs(30),
        fallback: Some(WaitStrategy::DomContentLoaded),
    }
}

/// Resolves `raw` against the server origin when it is a relative path.
///
/// # Errors
///
/// Returns the parse error when `raw` is neither an absolute URL nor a valid
/// relative reference.
pub fn resolve_url(origin: &Url, raw: &str) -> Result<Url, url::ParseError> {
    match Url::parse(raw.trim()) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => origin.join(raw.trim()),
        Err(e) => Err(e),
    }
}

/// Returns `true` for direct video files and known video players.
///
/// Leaving such a page goes through [`BLANK_URL`] first so the previous
/// page's media handles and timers are torn down before the next load.
pub fn is_video_like(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        let lower = url.to_ascii_lowercase();
        return VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext));
    };
    let path = parsed.path().to_ascii_lowercase();
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || VIDEO_HOSTS.iter().any(|h| host == *h || host.ends_with(&format!(".{h}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_auth_domain_gets_long_timeout_and_full_load() {
        let p = profile_for(&url("https://login.microsoftonline.com/common/oauth2"));
        assert_eq!(p.kind, ProfileKind::Auth);
        assert_eq!(p.wait, WaitStrategy::Load);
        assert_eq!(p.timeout, Duration::from_secs(60));
        assert_eq!(p.fallback, None);
    }

    #[test]
    fn test_auth_subdomain_matches() {
        let p = profile_for(&url("https://acme.okta.com/app/signage"));
        assert_eq!(p.kind, ProfileKind::Auth);
    }

    #[test]
    fn test_dashboard_waits_for_dom_ready_only() {
        let p = profile_for(&url("https://grafana.internal/d/abc123/fleet"));
        assert_eq!(p.kind, ProfileKind::NeverIdle);
        assert_eq!(p.wait, WaitStrategy::DomContentLoaded);
        assert_eq!(p.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_standard_page_has_lenient_fallback() {
        let p = profile_for(&url("https://example.com/menu.html"));
        assert_eq!(p.kind, ProfileKind::Standard);
        assert_eq!(p.timeout, Duration::from_secs(30));
        assert_eq!(p.fallback, Some(WaitStrategy::DomContentLoaded));
    }

    #[test]
    fn test_resolve_relative_path_against_origin() {
        let origin = url("https://signage.example.com");
        let resolved = resolve_url(&origin, "/uploads/menu.png").unwrap();
        assert_eq!(resolved.as_str(), "https://signage.example.com/uploads/menu.png");
    }

    #[test]
    fn test_resolve_keeps_absolute_urls() {
        let origin = url("https://signage.example.com");
        let resolved = resolve_url(&origin, "https://cdn.example.net/a.mp4").unwrap();
        assert_eq!(resolved.host_str(), Some("cdn.example.net"));
    }

    #[test]
    fn test_video_detection() {
        assert!(is_video_like("https://cdn.example.com/promo.MP4"));
        assert!(is_video_like("https://www.youtube.com/embed/xyz"));
        assert!(is_video_like("/media/loop.webm"));
        assert!(!is_video_like("https://example.com/menu.html"));
    }
}
