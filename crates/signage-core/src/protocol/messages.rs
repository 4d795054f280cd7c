//! Every control-channel event the agent understands or sends.
//!
//! Inbound events are decoded exactly once, at the connection boundary, into
//! [`InboundEvent`].  Nothing past that point ever looks at raw JSON.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::broadcast::{BroadcastKind, BroadcastOverride, BroadcastStyle};
use crate::domain::input::MouseButton;
use crate::domain::playlist::PlaylistItem;
use crate::domain::snapshot::PlaybackStateSnapshot;

// ── Event names ───────────────────────────────────────────────────────────────

/// Names of all inbound events.
///
/// The handler registry is keyed by this enum so every dispatchable event is
/// known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ContentUpdate,
    Navigate,
    ScreenshotRequest,
    ConfigUpdate,
    DeviceRestart,
    DisplayRefresh,
    RemoteClick,
    RemoteType,
    RemoteKey,
    RemoteScroll,
    StreamStart,
    StreamStop,
    ScreencastStart,
    ScreencastStop,
    PlaylistPause,
    PlaylistResume,
    PlaylistNext,
    PlaylistPrevious,
    BroadcastStart,
    BroadcastEnd,
}

impl EventKind {
    pub const ALL: [EventKind; 20] = [
        EventKind::ContentUpdate,
        EventKind::Navigate,
        EventKind::ScreenshotRequest,
        EventKind::ConfigUpdate,
        EventKind::DeviceRestart,
        EventKind::DisplayRefresh,
        EventKind::RemoteClick,
        EventKind::RemoteType,
        EventKind::RemoteKey,
        EventKind::RemoteScroll,
        EventKind::StreamStart,
        EventKind::StreamStop,
        EventKind::ScreencastStart,
        EventKind::ScreencastStop,
        EventKind::PlaylistPause,
        EventKind::PlaylistResume,
        EventKind::PlaylistNext,
        EventKind::PlaylistPrevious,
        EventKind::BroadcastStart,
        EventKind::BroadcastEnd,
    ];

    /// The wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ContentUpdate => "content-update",
            EventKind::Navigate => "navigate",
            EventKind::ScreenshotRequest => "screenshot-request",
            EventKind::ConfigUpdate => "config-update",
            EventKind::DeviceRestart => "device-restart",
            EventKind::DisplayRefresh => "display-refresh",
            EventKind::RemoteClick => "remote-click",
            EventKind::RemoteType => "remote-type",
            EventKind::RemoteKey => "remote-key",
            EventKind::RemoteScroll => "remote-scroll",
            EventKind::StreamStart => "stream-start",
            EventKind::StreamStop => "stream-stop",
            EventKind::ScreencastStart => "screencast-start",
            EventKind::ScreencastStop => "screencast-stop",
            EventKind::PlaylistPause => "playlist-pause",
            EventKind::PlaylistResume => "playlist-resume",
            EventKind::PlaylistNext => "playlist-next",
            EventKind::PlaylistPrevious => "playlist-previous",
            EventKind::BroadcastStart => "playlist-broadcast-start",
            EventKind::BroadcastEnd => "playlist-broadcast-end",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inbound payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdate {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NavigateCommand {
    pub url: String,
    /// Milliseconds to stay before resuming rotation.
    #[serde(default)]
    pub duration: Option<u64>,
}

/// Live configuration overrides.  Absent fields leave the setting alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self == &ConfigUpdate::default()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteClick {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub button: MouseButton,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteType {
    pub text: String,
    #[serde(default)]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteKey {
    pub key: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteScroll {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub delta_x: Option<f64>,
    #[serde(default)]
    pub delta_y: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreencastStart {
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub max_height: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistStep {
    #[serde(default = "default_true")]
    pub respect_constraints: bool,
}

impl Default for PlaylistStep {
    fn default() -> Self {
        Self { respect_constraints: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStart {
    #[serde(rename = "type")]
    pub kind: BroadcastKind,
    pub content: String,
    /// Milliseconds; `0` keeps the broadcast until it is ended.
    #[serde(default)]
    pub duration: u64,
    #[serde(flatten)]
    pub style: BroadcastStyle,
}

impl BroadcastStart {
    pub fn into_override(self) -> BroadcastOverride {
        BroadcastOverride {
            kind: self.kind,
            payload: self.content,
            duration: std::time::Duration::from_millis(self.duration),
            style: self.style,
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ContentUpdate(ContentUpdate),
    Navigate(NavigateCommand),
    ScreenshotRequest,
    ConfigUpdate(ConfigUpdate),
    DeviceRestart,
    DisplayRefresh,
    RemoteClick(RemoteClick),
    RemoteType(RemoteType),
    RemoteKey(RemoteKey),
    RemoteScroll(RemoteScroll),
    StreamStart(StreamStart),
    StreamStop,
    ScreencastStart(ScreencastStart),
    ScreencastStop,
    PlaylistPause,
    PlaylistResume,
    PlaylistNext(PlaylistStep),
    PlaylistPrevious(PlaylistStep),
    BroadcastStart(BroadcastStart),
    BroadcastEnd,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::ContentUpdate(_) => EventKind::ContentUpdate,
            InboundEvent::Navigate(_) => EventKind::Navigate,
            InboundEvent::ScreenshotRequest => EventKind::ScreenshotRequest,
            InboundEvent::ConfigUpdate(_) => EventKind::ConfigUpdate,
            InboundEvent::DeviceRestart => EventKind::DeviceRestart,
            InboundEvent::DisplayRefresh => EventKind::DisplayRefresh,
            InboundEvent::RemoteClick(_) => EventKind::RemoteClick,
            InboundEvent::RemoteType(_) => EventKind::RemoteType,
            InboundEvent::RemoteKey(_) => EventKind::RemoteKey,
            InboundEvent::RemoteScroll(_) => EventKind::RemoteScroll,
            InboundEvent::StreamStart(_) => EventKind::StreamStart,
            InboundEvent::StreamStop => EventKind::StreamStop,
            InboundEvent::ScreencastStart(_) => EventKind::ScreencastStart,
            InboundEvent::ScreencastStop => EventKind::ScreencastStop,
            InboundEvent::PlaylistPause => EventKind::PlaylistPause,
            InboundEvent::PlaylistResume => EventKind::PlaylistResume,
            InboundEvent::PlaylistNext(_) => EventKind::PlaylistNext,
            InboundEvent::PlaylistPrevious(_) => EventKind::PlaylistPrevious,
            InboundEvent::BroadcastStart(_) => EventKind::BroadcastStart,
            InboundEvent::BroadcastEnd => EventKind::BroadcastEnd,
        }
    }
}

// ── Outbound payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub token: String,
    pub agent_version: String,
    pub display: DisplaySize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotUpload {
    /// Base64-encoded JPEG.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    /// `true` for live-preview frames, `false` for scheduled captures.
    pub live: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Percent, 0–100.
    pub cpu_usage: f64,
    /// Percent, 0–100.
    pub memory_usage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_usage: Option<f64>,
    /// Host uptime in seconds.
    pub uptime: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatusKind {
    Online,
    Offline,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub status: DeviceStatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Classification of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Navigation,
    Crash,
    Stream,
    Connection,
    RemoteInput,
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Set only when local retries are exhausted.
    pub critical: bool,
    pub timestamp: String,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: None,
            critical: false,
            timestamp: timestamp_now(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Frame geometry as reported by the browser's screencast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub offset_top: f64,
    pub page_scale_factor: f64,
    pub device_width: f64,
    pub device_height: f64,
    pub scroll_offset_x: f64,
    pub scroll_offset_y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreencastFrame {
    /// Base64-encoded JPEG.
    pub data: String,
    pub metadata: FrameMetadata,
}

/// A message the agent sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    DeviceRegister(DeviceRegistration),
    ScreenshotUpload(ScreenshotUpload),
    HealthReport(HealthReport),
    DeviceStatus(DeviceStatus),
    ErrorReport(ErrorReport),
    PlaybackState(PlaybackStateSnapshot),
    ScreencastFrame(ScreencastFrame),
}

impl OutboundEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundEvent::DeviceRegister(_) => "device-register",
            OutboundEvent::ScreenshotUpload(_) => "screenshot-upload",
            OutboundEvent::HealthReport(_) => "health-report",
            OutboundEvent::DeviceStatus(_) => "device-status",
            OutboundEvent::ErrorReport(_) => "error-report",
            OutboundEvent::PlaybackState(_) => "playback-state-update",
            OutboundEvent::ScreencastFrame(_) => "screencast-frame",
        }
    }

    /// High-frequency events that are dropped rather than queued while the
    /// channel is down.
    pub fn is_volatile(&self) -> bool {
        matches!(self, OutboundEvent::ScreencastFrame(_))
    }
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn default_true() -> bool {
    true
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_event_name_round_trips_through_from_name() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("content_update"), None);
    }

    #[test]
    fn test_error_report_builder() {
        let report = ErrorReport::new(ErrorKind::Navigation, "timeout")
            .with_url("https://example.com")
            .critical();
        assert!(report.critical);
        assert_eq!(report.url.as_deref(), Some("https://example.com"));
        assert!(report.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_only_frames_are_volatile() {
        let frame = OutboundEvent::ScreencastFrame(ScreencastFrame {
            data: String::new(),
            metadata: FrameMetadata::default(),
        });
        let status = OutboundEvent::DeviceStatus(DeviceStatus {
            status: DeviceStatusKind::Online,
            message: None,
        });
        assert!(frame.is_volatile());
        assert!(!status.is_volatile());
    }
}
