//! Integration tests for the signage-core control-channel codec.
//!
//! These tests feed realistic server messages through the public API and
//! check that the typed events carry the fields the agent relies on.

use std::time::Duration;

use signage_core::{
    decode_inbound,
    domain::input::MouseButton,
    encode_outbound,
    protocol::messages::{
        ConfigUpdate, DeviceRegistration, DisplaySize, ErrorKind, ErrorReport, PlaylistStep,
    },
    BroadcastKind, InboundEvent, LogoPosition, OutboundEvent, PlaybackStateSnapshot,
};

#[test]
fn test_content_update_with_mixed_id_types() {
    // Arrange
    let text = r#"{
        "event": "content-update",
        "payload": {
            "playlistId": 42,
            "items": [
                {"id": 7, "contentId": "c-7", "content": {"url": "/menu.html", "name": "Menu"},
                 "displayDuration": 10000, "orderIndex": 1},
                {"id": "promo", "contentId": 8, "content": {"url": "https://cdn.example.com/p.mp4"},
                 "displayDuration": 0, "orderIndex": 0,
                 "timeWindowStart": "22:00", "timeWindowEnd": "06:00", "daysOfWeek": [0, 6]}
            ]
        }
    }"#;

    // Act
    let event = decode_inbound(text).expect("decode must succeed");

    // Assert
    let InboundEvent::ContentUpdate(update) = event else {
        panic!("expected content-update, got {event:?}");
    };
    assert_eq!(update.playlist_id.as_deref(), Some("42"));
    assert_eq!(update.items.len(), 2);
    assert_eq!(update.items[0].id, "7");
    assert_eq!(update.items[1].content_id, "8");
    assert_eq!(update.items[1].days_of_week, Some(vec![0, 6]));
    assert!(update.items[1].is_permanent());
}

#[test]
fn test_broadcast_start_with_style() {
    let text = r##"{
        "event": "playlist-broadcast-start",
        "payload": {"type": "message", "content": "Evacuate via stairwell B", "duration": 30000,
                    "background": "#b00020", "logo": "/logo.png", "logoPosition": "bottom-left"}
    }"##;

    let InboundEvent::BroadcastStart(start) = decode_inbound(text).unwrap() else {
        panic!("expected broadcast-start");
    };
    let broadcast = start.into_override();

    assert_eq!(broadcast.kind, BroadcastKind::Message);
    assert_eq!(broadcast.duration, Duration::from_secs(30));
    assert_eq!(broadcast.style.background.as_deref(), Some("#b00020"));
    assert_eq!(broadcast.style.logo_position, LogoPosition::BottomLeft);
}

#[test]
fn test_playlist_next_defaults_to_respecting_constraints() {
    let with_empty = decode_inbound(r#"{"event":"playlist-next","payload":{}}"#).unwrap();
    let without = decode_inbound(r#"{"event":"playlist-previous"}"#).unwrap();
    let forced =
        decode_inbound(r#"{"event":"playlist-next","payload":{"respectConstraints":false}}"#)
            .unwrap();

    assert_eq!(with_empty, InboundEvent::PlaylistNext(PlaylistStep { respect_constraints: true }));
    assert_eq!(without, InboundEvent::PlaylistPrevious(PlaylistStep { respect_constraints: true }));
    assert_eq!(forced, InboundEvent::PlaylistNext(PlaylistStep { respect_constraints: false }));
}

#[test]
fn test_remote_click_button_defaults_to_left() {
    let InboundEvent::RemoteClick(click) =
        decode_inbound(r#"{"event":"remote-click","payload":{"x":10.5,"y":20}}"#).unwrap()
    else {
        panic!("expected remote-click");
    };
    assert_eq!(click.button, MouseButton::Left);
    assert_eq!(click.x, 10.5);
}

#[test]
fn test_config_update_partial_fields() {
    let event =
        decode_inbound(r#"{"event":"config-update","payload":{"screenshotInterval":60000}}"#)
            .unwrap();
    assert_eq!(
        event,
        InboundEvent::ConfigUpdate(ConfigUpdate {
            screenshot_interval: Some(60_000),
            ..Default::default()
        })
    );
}

#[test]
fn test_registration_wire_shape() {
    let text = encode_outbound(&OutboundEvent::DeviceRegister(DeviceRegistration {
        token: "tok-123".into(),
        agent_version: "0.1.0".into(),
        display: DisplaySize { width: 1920, height: 1080 },
    }))
    .unwrap();

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["event"], "device-register");
    assert_eq!(value["payload"]["agentVersion"], "0.1.0");
    assert_eq!(value["payload"]["display"]["width"], 1920);
}

#[test]
fn test_error_report_kind_is_kebab_case() {
    let text = encode_outbound(&OutboundEvent::ErrorReport(ErrorReport::new(
        ErrorKind::RemoteInput,
        "no focused input",
    )))
    .unwrap();

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["payload"]["kind"], "remote-input");
    assert_eq!(value["payload"]["critical"], false);
}

#[test]
fn test_playback_state_event_name() {
    let text =
        encode_outbound(&OutboundEvent::PlaybackState(PlaybackStateSnapshot::default())).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["event"], "playback-state-update");
    assert_eq!(value["payload"]["isPlaying"], false);
}
