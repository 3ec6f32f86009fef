use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

// ========================= Action Kinds =========================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ActionKind {
    Click,
    DoubleClick,
    RightClick,
    Type,
    Press,
    Hotkey,
    Scroll,
    Wait,
    Noop,
    Done,
    Unknown(String),
}

impl ActionKind {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "CLICK" | "LEFT_CLICK" => ActionKind::Click,
            "DOUBLE_CLICK" | "DOUBLECLICK" => ActionKind::DoubleClick,
            "RIGHT_CLICK" | "RIGHTCLICK" => ActionKind::RightClick,
            "TYPE" => ActionKind::Type,
            "PRESS" | "KEY" | "KEYPRESS" => ActionKind::Press,
            "HOTKEY" => ActionKind::Hotkey,
            "SCROLL" => ActionKind::Scroll,
            "WAIT" => ActionKind::Wait,
            "" | "NOOP" | "NONE" => ActionKind::Noop,
            "DONE" | "BITTI" | "FINISHED" => ActionKind::Done,
            other => ActionKind::Unknown(other.to_string()),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, ActionKind::Click | ActionKind::DoubleClick | ActionKind::RightClick)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Click => "CLICK",
            ActionKind::DoubleClick => "DOUBLE_CLICK",
            ActionKind::RightClick => "RIGHT_CLICK",
            ActionKind::Type => "TYPE",
            ActionKind::Press => "PRESS",
            ActionKind::Hotkey => "HOTKEY",
            ActionKind::Scroll => "SCROLL",
            ActionKind::Wait => "WAIT",
            ActionKind::Noop => "NOOP",
            ActionKind::Done => "DONE",
            ActionKind::Unknown(s) => s,
        }
    }
}

impl From<String> for ActionKind {
    fn from(s: String) -> Self {
        ActionKind::parse(&s)
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Primary,
    Secondary,
    Middle,
}

impl MouseButton {
    /// X server button number, the numbering VNC-style sandboxes expect.
    pub fn x11_code(self) -> u8 {
        match self {
            MouseButton::Primary => 1,
            MouseButton::Middle => 2,
            MouseButton::Secondary => 3,
        }
    }
}

// ========================= Action =========================

/// One atomic step decided by the model, normalized from its raw mapping.
///
/// `x`/`y` stay unvalidated here; the loop runs the coordinate gate before a
/// pointer action is accepted and then writes the validated values back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip)]
    pub raw: Value,
}

/// One wheel notch in the units pointer devices report.
pub const WHEEL_NOTCH: i32 = 120;
const DEFAULT_SCROLL_NOTCHES: i32 = 3;

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            x: None,
            y: None,
            text: None,
            key: None,
            keys: Vec::new(),
            amount: None,
            seconds: None,
            detail: None,
            raw: Value::Null,
        }
    }

    pub fn pointer(kind: ActionKind, x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::new(kind) }
    }

    pub fn typing(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::new(ActionKind::Type) }
    }

    /// Reads a raw model mapping. Unknown or missing fields never fail; the
    /// kind defaults to `NOOP` and pointer fields are resolved later.
    pub fn from_raw(raw: Value) -> Self {
        let kind = raw
            .get("action")
            .or_else(|| raw.get("kind"))
            .and_then(Value::as_str)
            .map(ActionKind::parse)
            .unwrap_or(ActionKind::Noop);

        let text = str_field(&raw, &["text", "value"]);
        let key = str_field(&raw, &["key"]);
        let keys = match raw.get("keys") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .collect(),
            Some(Value::String(s)) => s.split('+').map(|t| t.trim().to_string()).collect(),
            _ => Vec::new(),
        };
        let amount = scroll_amount(&raw);
        let seconds = raw.get("seconds").and_then(Value::as_f64);
        let detail = str_field(&raw, &["why_short", "target", "reason"]);

        Self {
            kind,
            x: raw.get("x").and_then(Value::as_f64),
            y: raw.get("y").and_then(Value::as_f64),
            text,
            key,
            keys,
            amount,
            seconds,
            detail,
            raw,
        }
    }

    /// Wheel delta to send; positive scrolls up. A bare `SCROLL` scrolls down.
    pub fn scroll_delta(&self) -> i32 {
        self.amount.unwrap_or(-DEFAULT_SCROLL_NOTCHES * WHEEL_NOTCH)
    }

    /// Compact mapping handed back to the model as context.
    pub fn to_context(&self) -> Value {
        let mut v = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = v.as_object_mut() {
            if let Some(kind) = obj.remove("kind") {
                obj.insert("action".to_string(), kind);
            }
        }
        v
    }
}

fn str_field(raw: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| raw.get(*n).and_then(Value::as_str))
        .map(|s| s.to_string())
}

fn scroll_amount(raw: &Value) -> Option<i32> {
    let explicit = raw
        .get("amount")
        .or_else(|| raw.get("delta"))
        .or_else(|| raw.get("dy"))
        .and_then(Value::as_i64)
        .map(|n| n.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
    let direction = raw.get("direction").and_then(Value::as_str).map(str::to_ascii_lowercase);
    match (explicit, direction.as_deref()) {
        (Some(n), Some("down")) => Some(-n.saturating_abs()),
        (Some(n), Some("up")) => Some(n.saturating_abs()),
        (Some(n), _) => Some(n),
        (None, Some("down")) => Some(-DEFAULT_SCROLL_NOTCHES * WHEEL_NOTCH),
        (None, Some(_)) => Some(DEFAULT_SCROLL_NOTCHES * WHEEL_NOTCH),
        (None, None) => None,
    }
}

// ========================= History Entries =========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum HistoryEntry {
    Executed(Action),
    InvalidCoords { reason: String, raw: Value },
    InvalidAction { kind: String, raw: Value },
}

impl HistoryEntry {
    pub fn executed(&self) -> Option<&Action> {
        match self {
            HistoryEntry::Executed(a) => Some(a),
            _ => None,
        }
    }

    pub fn to_context(&self) -> Value {
        match self {
            HistoryEntry::Executed(a) => a.to_context(),
            HistoryEntry::InvalidCoords { reason, raw } => {
                json!({ "action": "INVALID_COORDS", "reason": reason, "raw": raw })
            }
            HistoryEntry::InvalidAction { kind, raw } => {
                json!({ "action": "INVALID_ACTION", "kind": kind, "raw": raw })
            }
        }
    }
}
