//! Broadcast overrides: transient priority content that preempts rotation.
//!
//! A broadcast is never stored in the playlist.  It exists only between
//! `startBroadcast` and `endBroadcast`.  URL broadcasts are shown by plain
//! navigation; message, image, and video broadcasts are rendered into a
//! self-contained HTML document.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shape of the broadcast payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastKind {
    Url,
    Message,
    Image,
    Video,
}

/// Where the optional logo is pinned on a styled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogoPosition {
    TopLeft,
    #[default]
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl LogoPosition {
    fn css(self) -> &'static str {
        match self {
            LogoPosition::TopLeft => "top:4vh;left:4vw;",
            LogoPosition::TopRight => "top:4vh;right:4vw;",
            LogoPosition::BottomLeft => "bottom:4vh;left:4vw;",
            LogoPosition::BottomRight => "bottom:4vh;right:4vw;",
            LogoPosition::Center => "top:8vh;left:50%;transform:translateX(-50%);",
        }
    }
}

/// Optional presentation for message broadcasts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStyle {
    /// A CSS colour or an image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default)]
    pub logo_position: LogoPosition,
}

/// A transient override pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastOverride {
    pub kind: BroadcastKind,
    /// URL for `url`/`image`/`video`, text for `message`.
    pub payload: String,
    /// Zero means "until ended manually".
    pub duration: Duration,
    pub style: BroadcastStyle,
}

/// How a broadcast is put on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastPage {
    /// Navigate the surface to this URL.
    Navigate(String),
    /// Install this HTML document on the surface.
    Document(String),
}

impl BroadcastOverride {
    /// Delay after which the broadcast ends on its own, if any.
    pub fn auto_end_after(&self) -> Option<Duration> {
        (!self.duration.is_zero()).then_some(self.duration)
    }

    pub fn page(&self) -> BroadcastPage {
        match self.kind {
            BroadcastKind::Url => BroadcastPage::Navigate(self.payload.clone()),
            BroadcastKind::Message => BroadcastPage::Document(self.message_document()),
            BroadcastKind::Image => BroadcastPage::Document(media_document(&format!(
                r#"<img src="{}" alt="">"#,
                attr(&self.payload)
            ))),
            BroadcastKind::Video => BroadcastPage::Document(media_document(&format!(
                r#"<video src="{}" autoplay muted loop playsinline></video>"#,
                attr(&self.payload)
            ))),
        }
    }

    fn message_document(&self) -> String {
        let background = match self.style.background.as_deref().map(str::trim) {
            Some(bg) if looks_like_image(bg) => {
                format!("background:#000 url({}) center/cover no-repeat;", css_url(bg))
            }
            Some(bg) if is_safe_css_colour(bg) => format!("background:{bg};"),
            _ => "background:#101820;".to_string(),
        };
        let logo = self
            .style
            .logo
            .as_deref()
            .map(|src| {
                format!(
                    r#"<img class="logo" style="{}" src="{}" alt="">"#,
                    self.style.logo_position.css(),
                    attr(src)
                )
            })
            .unwrap_or_default();

        format!(
            concat!(
                "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>",
                "html,body{{margin:0;height:100%;overflow:hidden;}}",
                "body{{color:#fff;display:flex;align-items:center;justify-content:center;",
                "font-family:sans-serif;}}",
                ".msg{{max-width:80vw;font-size:6vh;line-height:1.3;text-align:center;white-space:pre-wrap;",
                "text-shadow:0 2px 8px rgba(0,0,0,.6);}}",
                ".logo{{position:fixed;max-width:18vw;max-height:14vh;}}",
                "</style></head><body style=\"{bg}\">{logo}<div class=\"msg\">{text}</div></body></html>"
            ),
            bg = attr(&background),
            logo = logo,
            text = htmlescape::encode_minimal(&self.payload),
        )
    }
}

fn media_document(element: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>",
            "html,body{{margin:0;height:100%;background:#000;overflow:hidden;}}",
            "img,video{{width:100vw;height:100vh;object-fit:contain;}}",
            "</style></head><body>{}</body></html>"
        ),
        element
    )
}

/// Escapes a value for a double-quoted attribute.
fn attr(value: &str) -> String {
    htmlescape::encode_minimal(value)
}

/// Percent-encodes the characters that could end an unquoted CSS `url()`.
fn css_url(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("%22"),
            '\'' => out.push_str("%27"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '\\' => out.push_str("%5C"),
            c if c.is_whitespace() => out.push_str("%20"),
            c => out.push(c),
        }
    }
    out
}

fn looks_like_image(value: &str) -> bool {
    value.starts_with("http://")
        || value.starts_with("https://")
        || value.starts_with("data:image/")
        || value.starts_with('/')
}

fn is_safe_css_colour(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '(' | ')' | ',' | '.' | '%' | ' '))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast(kind: BroadcastKind, payload: &str) -> BroadcastOverride {
        BroadcastOverride {
            kind,
            payload: payload.to_string(),
            duration: Duration::ZERO,
            style: BroadcastStyle::default(),
        }
    }

    #[test]
    fn test_url_broadcast_navigates() {
        let b = broadcast(BroadcastKind::Url, "https://example.com/alert");
        assert_eq!(b.page(), BroadcastPage::Navigate("https://example.com/alert".into()));
    }

    #[test]
    fn test_message_text_is_escaped() {
        let b = broadcast(BroadcastKind::Message, "<script>alert(1)</script> & run");
        let BroadcastPage::Document(html) = b.page() else {
            panic!("message broadcasts render a document");
        };
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&amp; run"));
    }

    #[test]
    fn test_message_with_colour_background_and_logo() {
        // Arrange
        let mut b = broadcast(BroadcastKind::Message, "Fire drill at 14:00");
        b.style = BroadcastStyle {
            background: Some("#c0392b".into()),
            logo: Some("https://cdn.example.com/logo.png".into()),
            logo_position: LogoPosition::BottomLeft,
        };

        // Act
        let BroadcastPage::Document(html) = b.page() else {
            panic!("expected a document");
        };

        // Assert
        assert!(html.contains("background:#c0392b;"));
        assert!(html.contains("bottom:4vh;left:4vw;"));
        assert!(html.contains("https://cdn.example.com/logo.png"));
    }

    #[test]
    fn test_message_background_image_url_is_used_as_cover() {
        let mut b = broadcast(BroadcastKind::Message, "Hello");
        b.style.background = Some("https://cdn.example.com/bg.jpg".into());
        let BroadcastPage::Document(html) = b.page() else {
            panic!("expected a document");
        };
        assert!(html.contains("url(https://cdn.example.com/bg.jpg)"));
    }

    #[test]
    fn test_unsafe_background_falls_back_to_default() {
        let mut b = broadcast(BroadcastKind::Message, "Hello");
        b.style.background = Some("red;}</style><script>".into());
        let BroadcastPage::Document(html) = b.page() else {
            panic!("expected a document");
        };
        assert!(html.contains("background:#101820;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_video_broadcast_autoplays_muted() {
        let b = broadcast(BroadcastKind::Video, "https://cdn.example.com/promo.mp4");
        let BroadcastPage::Document(html) = b.page() else {
            panic!("expected a document");
        };
        assert!(html.contains("<video src=\"https://cdn.example.com/promo.mp4\" autoplay muted"));
    }

    #[test]
    fn test_auto_end_only_for_positive_duration() {
        let mut b = broadcast(BroadcastKind::Url, "https://example.com");
        assert_eq!(b.auto_end_after(), None);
        b.duration = Duration::from_secs(30);
        assert_eq!(b.auto_end_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_logo_position_deserializes_kebab_case() {
        let p: LogoPosition = serde_json::from_str("\"bottom-right\"").unwrap();
        assert_eq!(p, LogoPosition::BottomRight);
    }
}
