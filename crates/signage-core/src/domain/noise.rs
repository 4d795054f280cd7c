//! Filters for errors that are not worth reporting.

/// Substrings of page errors that come from third-party scripts, browser
/// quirks, or analytics and say nothing about the displayed content.
const BENIGN_PAGE_ERRORS: &[&str] = &[
    "resizeobserver loop",
    "script error.",
    "googletagmanager",
    "google-analytics",
    "gtag",
    "doubleclick",
    "facebook.net",
    "hotjar",
    "sentry",
    "chrome-extension://",
    "non-error promise rejection captured",
    "the play() request was interrupted",
    "failed to load resource: net::err_blocked_by_client",
    "favicon.ico",
];

/// Returns `true` for page errors that should not become error reports.
pub fn is_benign_page_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    BENIGN_PAGE_ERRORS.iter().any(|pattern| lower.contains(pattern))
}

/// JSON-RPC code for invalid method parameters.
pub const INVALID_PARAMS_CODE: i64 = -32602;

/// Returns `true` for protocol errors caused by a malformed request.
///
/// These point at a constant in the agent itself, not an operational fault,
/// so they are logged locally and never reported upstream.
pub fn is_parameter_validation_error(code: Option<i64>, message: &str) -> bool {
    code == Some(INVALID_PARAMS_CODE)
        || message.contains("Invalid parameters")
        || message.contains("invalid params")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_noise_is_benign() {
        assert!(is_benign_page_error("ResizeObserver loop limit exceeded"));
        assert!(is_benign_page_error(
            "Uncaught TypeError at https://www.googletagmanager.com/gtm.js"
        ));
        assert!(is_benign_page_error("Script error."));
    }

    #[test]
    fn test_real_errors_are_reported() {
        assert!(!is_benign_page_error("TypeError: menu.items is undefined"));
    }

    #[test]
    fn test_parameter_validation_detection() {
        assert!(is_parameter_validation_error(Some(-32602), "whatever"));
        assert!(is_parameter_validation_error(None, "Invalid parameters: quality"));
        assert!(!is_parameter_validation_error(Some(-32000), "Target closed"));
    }
}
