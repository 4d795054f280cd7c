//! Remote-input vocabulary: mouse buttons, modifier keys, and key lookup.
//!
//! # How keys are described (for beginners)
//!
//! A browser key event carries several names for the same physical key:
//!
//! - `key`  – the logical value, e.g. `"Enter"` or `"a"`.
//! - `code` – the physical key, e.g. `"Enter"` or `"KeyA"`.
//! - `keyCode` – the legacy Windows virtual-key number, e.g. `13` or `65`.
//! - `text` – the character the key types, if any.
//!
//! Pages differ in which of these they read, so the agent fills in all four.
//! The server only sends the short `key` name; [`KeyDescriptor::lookup`]
//! expands it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Name used by the DevTools input domain.
    pub fn protocol_name(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// A held modifier key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Alt,
    Ctrl,
    Meta,
    Shift,
}

impl Modifier {
    /// Accepts the common spellings (`ctrl`, `Control`, `cmd`, `option`, …).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "alt" | "option" => Some(Modifier::Alt),
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "meta" | "cmd" | "command" | "super" | "win" => Some(Modifier::Meta),
            "shift" => Some(Modifier::Shift),
            _ => None,
        }
    }

    /// Bit in the DevTools `modifiers` mask.
    pub fn bit(self) -> u8 {
        match self {
            Modifier::Alt => 1,
            Modifier::Ctrl => 2,
            Modifier::Meta => 4,
            Modifier::Shift => 8,
        }
    }

    pub fn key(self) -> KeyDescriptor {
        let (key, code, key_code) = match self {
            Modifier::Alt => ("Alt", "AltLeft", 18),
            Modifier::Ctrl => ("Control", "ControlLeft", 17),
            Modifier::Meta => ("Meta", "MetaLeft", 91),
            Modifier::Shift => ("Shift", "ShiftLeft", 16),
        };
        KeyDescriptor {
            key: key.to_string(),
            code: code.to_string(),
            key_code,
            text: None,
        }
    }
}

/// Combines modifiers into the DevTools bit mask.
pub fn modifier_mask(modifiers: &[Modifier]) -> u8 {
    modifiers.iter().fold(0, |mask, m| mask | m.bit())
}

/// Every name a key event needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub key: String,
    pub code: String,
    pub key_code: u32,
    pub text: Option<String>,
}

const NAMED_KEYS: &[(&str, &str, u32, Option<&str>)] = &[
    ("Enter", "Enter", 13, Some("\r")),
    ("Tab", "Tab", 9, Some("\t")),
    ("Backspace", "Backspace", 8, None),
    ("Escape", "Escape", 27, None),
    ("Delete", "Delete", 46, None),
    ("Insert", "Insert", 45, None),
    ("Home", "Home", 36, None),
    ("End", "End", 35, None),
    ("PageUp", "PageUp", 33, None),
    ("PageDown", "PageDown", 34, None),
    ("ArrowUp", "ArrowUp", 38, None),
    ("ArrowDown", "ArrowDown", 40, None),
    ("ArrowLeft", "ArrowLeft", 37, None),
    ("ArrowRight", "ArrowRight", 39, None),
    (" ", "Space", 32, Some(" ")),
    ("F1", "F1", 112, None),
    ("F2", "F2", 113, None),
    ("F3", "F3", 114, None),
    ("F4", "F4", 115, None),
    ("F5", "F5", 116, None),
    ("F6", "F6", 117, None),
    ("F7", "F7", 118, None),
    ("F8", "F8", 119, None),
    ("F9", "F9", 120, None),
    ("F10", "F10", 121, None),
    ("F11", "F11", 122, None),
    ("F12", "F12", 123, None),
];

const ALIASES: &[(&str, &str)] = &[
    ("return", "Enter"),
    ("esc", "Escape"),
    ("del", "Delete"),
    ("space", " "),
    ("up", "ArrowUp"),
    ("down", "ArrowDown"),
    ("left", "ArrowLeft"),
    ("right", "ArrowRight"),
];

impl KeyDescriptor {
    /// Expands a short key name into a full descriptor.
    ///
    /// Named keys are matched case-insensitively.  A single printable
    /// character maps to its physical key.  Anything else is passed through
    /// with a zero key code.
    pub fn lookup(name: &str) -> Self {
        let canonical = ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map_or(name, |(_, target)| *target);

        if let Some((key, code, key_code, text)) = NAMED_KEYS
            .iter()
            .find(|(key, ..)| key.eq_ignore_ascii_case(canonical))
        {
            return Self {
                key: (*key).to_string(),
                code: (*code).to_string(),
                key_code: *key_code,
                text: text.map(str::to_string),
            };
        }

        let mut chars = canonical.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Self::for_char(c);
        }

        Self {
            key: canonical.to_string(),
            code: canonical.to_string(),
            key_code: 0,
            text: None,
        }
    }

    fn for_char(c: char) -> Self {
        let upper = c.to_ascii_uppercase();
        let (code, key_code) = if c.is_ascii_alphabetic() {
            (format!("Key{upper}"), upper as u32)
        } else if c.is_ascii_digit() {
            (format!("Digit{c}"), c as u32)
        } else {
            (String::new(), 0)
        };
        Self {
            key: c.to_string(),
            code,
            key_code,
            text: Some(c.to_string()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_parse_accepts_aliases() {
        assert_eq!(Modifier::parse("Control"), Some(Modifier::Ctrl));
        assert_eq!(Modifier::parse("cmd"), Some(Modifier::Meta));
        assert_eq!(Modifier::parse("option"), Some(Modifier::Alt));
        assert_eq!(Modifier::parse("hyper"), None);
    }

    #[test]
    fn test_modifier_mask_combines_bits() {
        let mask = modifier_mask(&[Modifier::Ctrl, Modifier::Shift]);
        assert_eq!(mask, 2 | 8);
    }

    #[test]
    fn test_named_key_lookup_is_case_insensitive() {
        let enter = KeyDescriptor::lookup("enter");
        assert_eq!(enter.key, "Enter");
        assert_eq!(enter.key_code, 13);
        assert_eq!(enter.text.as_deref(), Some("\r"));
    }

    #[test]
    fn test_alias_lookup() {
        assert_eq!(KeyDescriptor::lookup("esc").key, "Escape");
        assert_eq!(KeyDescriptor::lookup("space").code, "Space");
    }

    #[test]
    fn test_single_letter_maps_to_physical_key() {
        let a = KeyDescriptor::lookup("a");
        assert_eq!(a.code, "KeyA");
        assert_eq!(a.key_code, 65);
        assert_eq!(a.text.as_deref(), Some("a"));
    }

    #[test]
    fn test_unknown_key_passes_through() {
        let k = KeyDescriptor::lookup("MediaPlayPause");
        assert_eq!(k.key, "MediaPlayPause");
        assert_eq!(k.key_code, 0);
    }

    #[test]
    fn test_mouse_button_defaults_to_left() {
        assert_eq!(MouseButton::default().protocol_name(), "left");
    }
}
