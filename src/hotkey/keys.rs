//! Key token parsing and modifier-variant expansion
//!
//! A toggle key is an ordered list of tokens: zero or more modifier
//! tokens followed by exactly one non-modifier key, e.g.
//! `["Ctrl", "Alt", "M"]` or the accelerator string `"Ctrl+Alt+M"`.

use std::fmt;

use global_hotkey::hotkey::HotKey;
use serde::{Deserialize, Serialize};

use super::HotkeyError;

/// Tracks which modifier keys are part of a binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    /// Control key is held
    pub ctrl: bool,
    /// Alt/Option key is held
    pub alt: bool,
    /// Shift key is held
    pub shift: bool,
    /// Super/Command/Windows key is held
    pub super_key: bool,
}

impl Modifiers {
    /// No modifiers at all
    pub const NONE: Self = Self {
        ctrl: false,
        alt: false,
        shift: false,
        super_key: false,
    };

    const fn with(ctrl: bool, alt: bool, shift: bool) -> Self {
        Self {
            ctrl,
            alt,
            shift,
            super_key: false,
        }
    }

    /// All combinations of Ctrl, Alt and Shift, bare key first.
    pub fn ignorable_combinations() -> [Modifiers; 8] {
        [
            Self::with(false, false, false),
            Self::with(true, false, false),
            Self::with(false, true, false),
            Self::with(false, false, true),
            Self::with(true, true, false),
            Self::with(true, false, true),
            Self::with(false, true, true),
            Self::with(true, true, true),
        ]
    }
}

/// One concrete global key combination as registered with the OS
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub modifiers: Modifiers,
    /// Canonical upper-case key name (`F9`, `M`, `SPACE`)
    pub key: String,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.ctrl {
            write!(f, "Ctrl+")?;
        }
        if self.modifiers.alt {
            write!(f, "Alt+")?;
        }
        if self.modifiers.shift {
            write!(f, "Shift+")?;
        }
        if self.modifiers.super_key {
            write!(f, "Super+")?;
        }
        write!(f, "{}", self.key)
    }
}

/// A validated toggle key: modifiers plus one base key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    modifiers: Modifiers,
    key: String,
}

enum Token {
    Ctrl,
    Alt,
    Shift,
    Super,
    Key(String),
}

fn classify(token: &str) -> Result<Token, HotkeyError> {
    let upper = token.trim().to_uppercase();
    let token = match upper.as_str() {
        "" => return Err(HotkeyError::InvalidKey("empty key token".to_string())),
        "CTRL" | "CONTROL" => Token::Ctrl,
        "ALT" | "OPTION" => Token::Alt,
        "SHIFT" => Token::Shift,
        "SUPER" | "CMD" | "COMMAND" | "WIN" | "META" => Token::Super,
        "ESC" => Token::Key("ESCAPE".to_string()),
        "RETURN" => Token::Key("ENTER".to_string()),
        "DEL" => Token::Key("DELETE".to_string()),
        "INS" => Token::Key("INSERT".to_string()),
        "PGUP" => Token::Key("PAGEUP".to_string()),
        "PGDN" => Token::Key("PAGEDOWN".to_string()),
        "SPACEBAR" => Token::Key("SPACE".to_string()),
        _ => Token::Key(upper),
    };
    Ok(token)
}

/// Reject base keys the OS hotkey layer cannot bind
fn check_key_name(token: &str, name: &str) -> Result<(), HotkeyError> {
    name.parse::<HotKey>()
        .map(|_| ())
        .map_err(|e| HotkeyError::InvalidKey(format!("unknown key '{}': {e}", token.trim())))
}

impl KeySpec {
    /// Build a key spec from ordered tokens, modifiers first.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self, HotkeyError> {
        let mut modifiers = Modifiers::NONE;
        let mut key: Option<String> = None;

        for token in tokens {
            let token = token.as_ref();
            if let Some(existing) = &key {
                return Err(HotkeyError::InvalidKey(format!(
                    "'{token}' follows the non-modifier key '{existing}'"
                )));
            }
            match classify(token)? {
                Token::Ctrl => modifiers.ctrl = true,
                Token::Alt => modifiers.alt = true,
                Token::Shift => modifiers.shift = true,
                Token::Super => modifiers.super_key = true,
                Token::Key(name) => {
                    check_key_name(token, &name)?;
                    key = Some(name);
                }
            }
        }

        match key {
            Some(key) => Ok(Self { modifiers, key }),
            None if tokens.is_empty() => {
                Err(HotkeyError::InvalidKey("toggle key is empty".to_string()))
            }
            None => Err(HotkeyError::InvalidKey(
                "toggle key must end with a non-modifier key".to_string(),
            )),
        }
    }

    /// Parse an accelerator string like `Ctrl+Shift+M`
    pub fn parse(accelerator: &str) -> Result<Self, HotkeyError> {
        let tokens: Vec<&str> = accelerator.split('+').collect();
        Self::from_tokens(tokens.as_slice())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Expand into the concrete bindings to register.
    ///
    /// With `ignore_modifiers` the written Ctrl/Alt/Shift are dropped and the
    /// base key is bound under all eight Ctrl/Alt/Shift combinations. Super is
    /// never ignored and stays on every variant.
    pub fn bindings(&self, ignore_modifiers: bool) -> Vec<Binding> {
        if !ignore_modifiers {
            return vec![Binding {
                modifiers: self.modifiers,
                key: self.key.clone(),
            }];
        }

        Modifiers::ignorable_combinations()
            .into_iter()
            .map(|mut modifiers| {
                modifiers.super_key = self.modifiers.super_key;
                Binding {
                    modifiers,
                    key: self.key.clone(),
                }
            })
            .collect()
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = Binding {
            modifiers: self.modifiers,
            key: self.key.clone(),
        };
        fmt::Display::fmt(&binding, f)
    }
}
