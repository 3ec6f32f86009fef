#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use sandbox_pilot::vision::Frame;
use sandbox_pilot::{Actuator, AgentConfig, AgentError, MouseButton, NormalizedPoint, Reasoner, ScreenSource, StopFlag};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Move(f64, f64),
    Down(MouseButton),
    Up(MouseButton),
    Drag(f64, f64, MouseButton),
    Scroll(i32),
    Type(String),
    Press(String),
    Hotkey(Vec<String>),
}

/// Environment double: serves a blank frame and records every input call.
#[derive(Clone, Default)]
pub struct FakeDesktop {
    calls: Arc<Mutex<Vec<Call>>>,
    captures: Arc<Mutex<usize>>,
    fail_capture: bool,
    fail_input: bool,
}

impl FakeDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail_capture: true, ..Self::default() }
    }

    /// Captures succeed; every input call is refused.
    pub fn failing_input() -> Self {
        Self { fail_input: true, ..Self::default() }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn captures(&self) -> usize {
        *self.captures.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, c: Call) -> Result<(), AgentError> {
        if self.fail_input {
            return Err(AgentError::Actuation("input device detached".into()));
        }
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(c);
        Ok(())
    }
}

#[async_trait]
impl ScreenSource for FakeDesktop {
    async fn capture(&self) -> Result<Frame, AgentError> {
        *self.captures.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if self.fail_capture {
            return Err(AgentError::Capture("display unreachable".into()));
        }
        Ok(Frame::new(RgbImage::from_pixel(64, 40, Rgb([30, 30, 30]))))
    }
}

#[async_trait]
impl Actuator for FakeDesktop {
    async fn move_to(&self, p: NormalizedPoint) -> Result<(), AgentError> {
        self.push(Call::Move(p.x(), p.y()))
    }
    async fn button_down(&self, b: MouseButton) -> Result<(), AgentError> {
        self.push(Call::Down(b))
    }
    async fn button_up(&self, b: MouseButton) -> Result<(), AgentError> {
        self.push(Call::Up(b))
    }
    async fn drag_to(&self, p: NormalizedPoint, b: MouseButton) -> Result<(), AgentError> {
        self.push(Call::Drag(p.x(), p.y(), b))
    }
    async fn scroll(&self, d: i32) -> Result<(), AgentError> {
        self.push(Call::Scroll(d))
    }
    async fn type_text(&self, t: &str) -> Result<(), AgentError> {
        self.push(Call::Type(t.to_string()))
    }
    async fn press_key(&self, k: &str) -> Result<(), AgentError> {
        self.push(Call::Press(k.to_string()))
    }
    async fn hotkey(&self, keys: &[String]) -> Result<(), AgentError> {
        self.push(Call::Hotkey(keys.to_vec()))
    }
}

/// Replays queued decisions in order; answers `DONE` once the queue runs dry.
#[derive(Default)]
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<Value>>,
    seen: Mutex<Vec<Vec<Value>>>,
    stop_on_call: Option<(usize, StopFlag)>,
    gate: Option<Arc<Notify>>,
    entered: Option<Arc<Notify>>,
    fail: bool,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<Value>) -> Self {
        Self { replies: Mutex::new(replies.into()), ..Self::default() }
    }

    /// Sets `flag` while answering the `n`th query (1-based).
    pub fn stopping_at(mut self, n: usize, flag: StopFlag) -> Self {
        self.stop_on_call = Some((n, flag));
        self
    }

    /// Each query waits for a permit on `gate` first.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Signals `entered` as soon as a query begins.
    pub fn signalling(mut self, entered: Arc<Notify>) -> Self {
        self.entered = Some(entered);
        self
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    /// History context handed over on each query.
    pub fn seen(&self) -> Vec<Vec<Value>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn decide(&self, _objective: &str, frame_path: &Path, history: &[Value]) -> Result<Value, AgentError> {
        if let Some(entered) = &self.entered {
            entered.notify_one();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(AgentError::Reasoner("endpoint returned 500".into()));
        }
        assert!(frame_path.exists(), "frame must be persisted before the model is asked");
        let calls = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            seen.push(history.to_vec());
            seen.len()
        };
        if let Some((n, flag)) = &self.stop_on_call {
            if calls == *n {
                flag.stop();
            }
        }
        let next = self.replies.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        Ok(next.unwrap_or_else(|| json!({ "action": "DONE" })))
    }
}

pub fn config(dir: &Path) -> AgentConfig {
    AgentConfig {
        wait_before_capture: Duration::ZERO,
        screenshot_path: dir.join("screen.png"),
        preview_path_template: Some(dir.join("preview_{i}.png").to_string_lossy().into_owned()),
        ..AgentConfig::default()
    }
}
