//! Remote input: clicks, typing, key chords, and scrolling on the active
//! surface.
//!
//! Every operation first checks that the active surface is still open.  A
//! closed surface makes the call a silent no-op, since the page it was aimed
//! at no longer exists.

use std::sync::Arc;

use serde_json::Value;
use signage_core::domain::input::{modifier_mask, KeyDescriptor, Modifier, MouseButton};
use signage_core::protocol::messages::{RemoteClick, RemoteKey, RemoteScroll, RemoteType};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::driver::{
    BrowserDriver, DriverError, KeyAction, KeyInput, MouseAction, MouseInput, SurfaceId,
};
use crate::application::render::RenderController;

#[derive(Debug, Error)]
pub enum InputError {
    /// Nothing is focused and the page has no focusable input.
    #[error("no input field is focused and none could be found; tap a field first or pass a selector")]
    NoFocusedInput,

    #[error("no element matches selector {0:?}")]
    SelectorNotFound(String),

    #[error("unknown modifier {0:?}")]
    UnknownModifier(String),

    #[error("input dispatch failed: {0}")]
    Driver(#[from] DriverError),
}

/// Focuses the target element and reports what happened.
fn focus_script(selector: Option<&str>) -> String {
    let selector = serde_json::to_string(&selector).unwrap_or_else(|_| "null".to_string());
    format!(
        r#"(() => {{
  const selector = {selector};
  const editable = (el) => !!el && (el.isContentEditable ||
    ['INPUT', 'TEXTAREA', 'SELECT'].includes(el.tagName));
  if (selector) {{
    const target = document.querySelector(selector);
    if (!target) return 'missing';
    target.focus();
    return 'focused';
  }}
  if (editable(document.activeElement)) return 'focused';
  const first = document.querySelector(
    'input:not([type=hidden]):not([disabled]), textarea:not([disabled]), [contenteditable=""], [contenteditable="true"]');
  if (!first) return 'none';
  first.focus();
  return 'focused';
}})()"#
    )
}

pub struct RemoteInput {
    render: Arc<RenderController>,
}

impl RemoteInput {
    pub fn new(render: Arc<RenderController>) -> Self {
        Self { render }
    }

    fn driver(&self) -> &Arc<dyn BrowserDriver> {
        self.render.driver()
    }

    async fn surface(&self) -> Option<SurfaceId> {
        let surface = self.render.live_surface().await;
        if surface.is_none() {
            debug!("remote input ignored: no live surface");
        }
        surface
    }

    /// Moves to `(x, y)` and clicks `button` once.
    pub async fn click(&self, click: &RemoteClick) -> Result<(), InputError> {
        let Some(surface) = self.surface().await else {
            return Ok(());
        };
        debug!("click {:?} at ({}, {})", click.button, click.x, click.y);
        for action in [MouseAction::Move, MouseAction::Press, MouseAction::Release] {
            let input = MouseInput::new(action, click.x, click.y, click.button);
            ignore_gone(self.driver().dispatch_mouse(&surface, input).await)?;
        }
        Ok(())
    }

    /// Types text into the focused element (or into `selector`).
    pub async fn type_text(&self, request: &RemoteType) -> Result<(), InputError> {
        let Some(surface) = self.surface().await else {
            return Ok(());
        };
        let selector = request.selector.as_deref();
        let outcome = match self.driver().evaluate(&surface, &focus_script(selector)).await {
            Ok(value) => value,
            Err(DriverError::SurfaceGone(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match outcome.as_str() {
            Some("focused") => {}
            Some("missing") => {
                return Err(InputError::SelectorNotFound(selector.unwrap_or_default().to_string()))
            }
            _ => return Err(InputError::NoFocusedInput),
        }
        info!("typing {} character(s)", request.text.chars().count());
        ignore_gone(self.driver().insert_text(&surface, &request.text).await)
    }

    /// Presses `key` while holding the modifiers.
    ///
    /// Modifiers go down in the given order before the key and come up in
    /// reverse order after it.
    pub async fn key(&self, request: &RemoteKey) -> Result<(), InputError> {
        let modifiers = request
            .modifiers
            .iter()
            .map(|name| Modifier::parse(name).ok_or_else(|| InputError::UnknownModifier(name.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(surface) = self.surface().await else {
            return Ok(());
        };

        let mut key = KeyDescriptor::lookup(&request.key);
        let mask = modifier_mask(&modifiers);
        let chord = Modifier::Alt.bit() | Modifier::Ctrl.bit() | Modifier::Meta.bit();
        if mask & chord != 0 {
            // Shortcuts must not insert their character.
            key.text = None;
        }
        debug!("key {} with mask {mask}", key.key);

        let mut pressed = 0;
        let mut outcome = Ok(());
        for held in 1..=modifiers.len() {
            let modifier = modifiers[held - 1];
            outcome = self
                .send_key(&surface, KeyAction::Down, modifier.key(), modifier_mask(&modifiers[..held]))
                .await;
            if outcome.is_err() {
                break;
            }
            pressed = held;
        }
        if outcome.is_ok() {
            outcome = match self.send_key(&surface, KeyAction::Down, key.clone(), mask).await {
                Ok(()) => self.send_key(&surface, KeyAction::Up, key, mask).await,
                Err(e) => Err(e),
            };
        }

        // Whatever went down comes back up, even after a failure.
        for held in (0..pressed).rev() {
            let modifier = modifiers[held];
            let released = self
                .send_key(&surface, KeyAction::Up, modifier.key(), modifier_mask(&modifiers[..held]))
                .await;
            if outcome.is_ok() {
                outcome = released;
            } else if let Err(e) = released {
                warn!("failed to release {:?}: {e}", modifier);
            }
        }
        outcome
    }

    /// Scrolls to `(x, y)` when given, otherwise by `(delta_x, delta_y)`.
    pub async fn scroll(&self, request: &RemoteScroll) -> Result<(), InputError> {
        let Some(surface) = self.surface().await else {
            return Ok(());
        };

        if request.x.is_some() || request.y.is_some() {
            let x = request.x.map_or_else(|| "window.scrollX".to_string(), |x| x.to_string());
            let y = request.y.map_or_else(|| "window.scrollY".to_string(), |y| y.to_string());
            let script = format!("window.scrollTo({x}, {y})");
            return ignore_gone(self.driver().evaluate(&surface, &script).await.map(|_: Value| ()));
        }

        let viewport = self.render.viewport();
        let mut wheel = MouseInput::new(
            MouseAction::Wheel,
            f64::from(viewport.width) / 2.0,
            f64::from(viewport.height) / 2.0,
            MouseButton::Left,
        );
        wheel.delta_x = request.delta_x.unwrap_or(0.0);
        wheel.delta_y = request.delta_y.unwrap_or(0.0);
        ignore_gone(self.driver().dispatch_mouse(&surface, wheel).await)
    }

    async fn send_key(
        &self,
        surface: &SurfaceId,
        action: KeyAction,
        key: KeyDescriptor,
        modifiers: u8,
    ) -> Result<(), InputError> {
        ignore_gone(
            self.driver()
                .dispatch_key(surface, KeyInput { action, key, modifiers })
                .await,
        )
    }
}

/// A surface that closed mid-operation is not an error.
fn ignore_gone(result: Result<(), DriverError>) -> Result<(), InputError> {
    match result {
        Ok(()) | Err(DriverError::SurfaceGone(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::PassthroughCache;
    use crate::infrastructure::mock::{DriverCall, MockBrowserDriver, RecordingTelemetry};
    use signage_core::protocol::messages::DisplaySize;
    use url::Url;

    async fn fixture() -> (Arc<MockBrowserDriver>, RemoteInput) {
        let driver = Arc::new(MockBrowserDriver::new());
        let render = Arc::new(RenderController::new(
            driver.clone(),
            Arc::new(RecordingTelemetry::default()),
            Arc::new(PassthroughCache),
            Url::parse("https://signage.example.com").unwrap(),
            DisplaySize { width: 1000, height: 800 },
        ));
        render.start().await.unwrap();
        driver.clear_calls();
        (driver, RemoteInput::new(render))
    }

    fn key_events(driver: &MockBrowserDriver) -> Vec<(KeyAction, String, u8)> {
        driver
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::Key(input) => Some((input.action, input.key.key, input.modifiers)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_click_moves_presses_and_releases() {
        // Arrange
        let (driver, input) = fixture().await;

        // Act
        input
            .click(&RemoteClick { x: 10.0, y: 20.0, button: MouseButton::Right })
            .await
            .unwrap();

        // Assert
        let actions: Vec<MouseAction> = driver
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::Mouse(m) => Some(m.action),
                _ => None,
            })
            .collect();
        assert_eq!(actions, [MouseAction::Move, MouseAction::Press, MouseAction::Release]);
    }

    #[tokio::test]
    async fn test_modifiers_wrap_the_key_in_reverse_order() {
        let (driver, input) = fixture().await;

        input
            .key(&RemoteKey {
                key: "a".into(),
                modifiers: vec!["ctrl".into(), "shift".into()],
            })
            .await
            .unwrap();

        assert_eq!(
            key_events(&driver),
            [
                (KeyAction::Down, "Control".to_string(), 2),
                (KeyAction::Down, "Shift".to_string(), 10),
                (KeyAction::Down, "a".to_string(), 10),
                (KeyAction::Up, "a".to_string(), 10),
                (KeyAction::Up, "Shift".to_string(), 2),
                (KeyAction::Up, "Control".to_string(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_modifiers_are_released_when_the_key_fails() {
        // Arrange
        let (driver, input) = fixture().await;
        driver.fail_key_down("a", DriverError::Connection("socket closed".into()));

        // Act
        let result = input
            .key(&RemoteKey {
                key: "a".into(),
                modifiers: vec!["ctrl".into(), "shift".into()],
            })
            .await;

        // Assert
        assert!(matches!(result, Err(InputError::Driver(DriverError::Connection(_)))));
        assert_eq!(
            key_events(&driver),
            [
                (KeyAction::Down, "Control".to_string(), 2),
                (KeyAction::Down, "Shift".to_string(), 10),
                (KeyAction::Down, "a".to_string(), 10),
                (KeyAction::Up, "Shift".to_string(), 2),
                (KeyAction::Up, "Control".to_string(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_modifier_is_rejected_before_any_key_goes_down() {
        let (driver, input) = fixture().await;

        let err = input
            .key(&RemoteKey {
                key: "Enter".into(),
                modifiers: vec!["hyper".into()],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, InputError::UnknownModifier(m) if m == "hyper"));
        assert!(key_events(&driver).is_empty());
    }

    #[tokio::test]
    async fn test_type_without_focus_target_reports_actionable_error() {
        let (driver, input) = fixture().await;
        driver.script_evaluation(Value::String("none".into()));

        let err = input
            .type_text(&RemoteType { text: "hello".into(), selector: None })
            .await
            .unwrap_err();

        assert!(matches!(err, InputError::NoFocusedInput));
        assert!(!driver.calls().iter().any(|c| matches!(c, DriverCall::InsertText(_))));
    }

    #[tokio::test]
    async fn test_type_into_selector_inserts_text() {
        let (driver, input) = fixture().await;
        driver.script_evaluation(Value::String("focused".into()));

        input
            .type_text(&RemoteType {
                text: "hello".into(),
                selector: Some("#search".into()),
            })
            .await
            .unwrap();

        let calls = driver.calls();
        assert!(calls
            .iter()
            .any(|c| matches!(c, DriverCall::Evaluate(js) if js.contains(r##""#search""##))));
        assert!(calls.contains(&DriverCall::InsertText("hello".into())));
    }

    #[tokio::test]
    async fn test_absolute_scroll_uses_scroll_to() {
        let (driver, input) = fixture().await;

        input
            .scroll(&RemoteScroll { x: Some(0.0), y: Some(400.0), delta_x: None, delta_y: None })
            .await
            .unwrap();

        assert!(driver
            .calls()
            .contains(&DriverCall::Evaluate("window.scrollTo(0, 400)".into())));
    }

    #[tokio::test]
    async fn test_relative_scroll_wheels_at_viewport_centre() {
        let (driver, input) = fixture().await;

        input
            .scroll(&RemoteScroll { x: None, y: None, delta_x: None, delta_y: Some(120.0) })
            .await
            .unwrap();

        let wheel = driver
            .calls()
            .into_iter()
            .find_map(|c| match c {
                DriverCall::Mouse(m) if m.action == MouseAction::Wheel => Some(m),
                _ => None,
            })
            .unwrap();
        assert_eq!((wheel.x, wheel.y, wheel.delta_y), (500.0, 400.0, 120.0));
    }

    #[tokio::test]
    async fn test_closed_surface_is_a_noop() {
        let (driver, input) = fixture().await;
        driver.close_surface("page-1");

        input
            .click(&RemoteClick { x: 1.0, y: 1.0, button: MouseButton::Left })
            .await
            .unwrap();

        assert!(driver.calls().iter().all(|c| !matches!(c, DriverCall::Mouse(_))));
    }
}
