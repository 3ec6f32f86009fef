use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::action::MouseButton;
use crate::agent::{Actuator, AgentError};
use crate::viewport::ViewportMapper;

/// Button as reported by the windowing layer, before canonicalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawButton {
    Left,
    Right,
    Middle,
    Other(u8),
}

impl RawButton {
    pub fn canonical(self) -> Option<MouseButton> {
        match self {
            RawButton::Left => Some(MouseButton::Primary),
            RawButton::Right => Some(MouseButton::Secondary),
            RawButton::Middle => Some(MouseButton::Middle),
            RawButton::Other(_) => None,
        }
    }
}

/// Pointer events in display-surface pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    Down { x: i32, y: i32, button: RawButton },
    Move { x: i32, y: i32 },
    Up { button: RawButton },
    Wheel { delta: i32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Space,
    FullScreen,
    Character,
    Other,
}

impl Key {
    /// Environment key name for keys that do not produce text.
    pub fn env_name(self) -> Option<&'static str> {
        Some(match self {
            Key::Enter => "enter",
            Key::Tab => "tab",
            Key::Escape => "esc",
            Key::Backspace => "backspace",
            Key::Delete => "delete",
            Key::Up => "up",
            Key::Down => "down",
            Key::Left => "left",
            Key::Right => "right",
            Key::Home => "home",
            Key::End => "end",
            Key::PageUp => "pageup",
            Key::PageDown => "pagedown",
            Key::Space => "space",
            Key::FullScreen | Key::Character | Key::Other => return None,
        })
    }
}

/// A key press. `text` is what the key types without modifiers applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub text: Option<String>,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn named(key: Key) -> Self {
        Self { key, text: None, modifiers: Modifiers::default() }
    }

    pub fn character(c: char) -> Self {
        Self { key: Key::Character, text: Some(c.to_string()), modifiers: Modifiers::default() }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputOutcome {
    Forwarded,
    Ignored,
    /// Handled locally by the view; nothing was sent to the environment.
    ToggleFullScreen,
}

pub const DEFAULT_MOVE_DEBOUNCE: Duration = Duration::from_millis(30);

/// Forwards live pointer and keyboard input from the interactive view to the
/// environment through the letterbox mapping.
pub struct InputTranslator<A: Actuator> {
    actuator: A,
    mapper: ViewportMapper,
    pressed: Option<MouseButton>,
    last_move: Option<Instant>,
    debounce: Duration,
    enabled: bool,
}

impl<A: Actuator> InputTranslator<A> {
    pub fn new(actuator: A, mapper: ViewportMapper) -> Self {
        Self {
            actuator,
            mapper,
            pressed: None,
            last_move: None,
            debounce: DEFAULT_MOVE_DEBOUNCE,
            enabled: true,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn mapper(&self) -> &ViewportMapper {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut ViewportMapper {
        &mut self.mapper
    }

    pub fn pressed(&self) -> Option<MouseButton> {
        self.pressed
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn handle_pointer(&mut self, event: PointerEvent) -> Result<InputOutcome, AgentError> {
        if !self.enabled {
            return Ok(InputOutcome::Ignored);
        }
        match event {
            PointerEvent::Down { x, y, button } => {
                let (Some(point), Some(button)) = (self.mapper.display_to_normalized(x, y), button.canonical()) else {
                    return Ok(InputOutcome::Ignored);
                };
                self.pressed = Some(button);
                self.actuator.move_to(point).await?;
                self.actuator.button_down(button).await?;
            }
            PointerEvent::Move { x, y } => {
                let Some(point) = self.mapper.display_to_normalized(x, y) else {
                    return Ok(InputOutcome::Ignored);
                };
                let now = Instant::now();
                if let Some(last) = self.last_move {
                    if now.duration_since(last) < self.debounce {
                        return Ok(InputOutcome::Ignored);
                    }
                }
                self.last_move = Some(now);
                match self.pressed {
                    Some(button) => self.actuator.drag_to(point, button).await?,
                    None => self.actuator.move_to(point).await?,
                }
            }
            PointerEvent::Up { .. } => {
                // Release whatever was pressed; the up event's own button is not trusted.
                let Some(button) = self.pressed.take() else {
                    return Ok(InputOutcome::Ignored);
                };
                self.actuator.button_up(button).await?;
            }
            PointerEvent::Wheel { delta } => {
                if delta == 0 {
                    return Ok(InputOutcome::Ignored);
                }
                self.actuator.scroll(delta).await?;
            }
        }
        Ok(InputOutcome::Forwarded)
    }

    pub async fn handle_key(&mut self, event: &KeyEvent) -> Result<InputOutcome, AgentError> {
        if !self.enabled {
            return Ok(InputOutcome::Ignored);
        }
        if event.key == Key::FullScreen {
            return Ok(InputOutcome::ToggleFullScreen);
        }

        let printable = event
            .text
            .as_deref()
            .filter(|t| !t.is_empty() && !t.chars().any(char::is_control));

        if event.modifiers.ctrl {
            if let Some(text) = printable {
                let chord = vec!["ctrl".to_string(), text.to_lowercase()];
                self.actuator.hotkey(&chord).await?;
                return Ok(InputOutcome::Forwarded);
            }
        }
        if event.modifiers.alt && event.key == Key::Tab {
            self.actuator.hotkey(&["alt".to_string(), "tab".to_string()]).await?;
            return Ok(InputOutcome::Forwarded);
        }
        if let Some(text) = printable {
            if text.chars().count() == 1 {
                self.actuator.type_text(text).await?;
                return Ok(InputOutcome::Forwarded);
            }
        }
        if let Some(name) = event.key.env_name() {
            self.actuator.press_key(name).await?;
            return Ok(InputOutcome::Forwarded);
        }
        debug!(key = ?event.key, "key not forwarded");
        Ok(InputOutcome::Ignored)
    }
}
