use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as OxideBrowser, BrowserConfig as OxideConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    InsertTextParams, MouseButton as CdpButton,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::action::MouseButton;
use crate::agent::{Actuator, AgentError, ScreenSource};
use crate::coords::NormalizedPoint;
use crate::vision::Frame;

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    /// CSS pixel size of the page; normalized points are scaled against it.
    pub viewport: (u32, u32),
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None, viewport: (1280, 800) }
    }
}

/// A Chromium page acting as the target environment.
pub struct Browser {
    page: Page,
    viewport: (u32, u32),
    pointer: Mutex<(f64, f64)>,
    clicks: Mutex<ClickTracker>,
    _browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = OxideConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Fresh profile per launch; Chromium refuses a locked one.
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("sandbox-pilot-profile-{}-{}", std::process::id(), ts));
        std::fs::create_dir_all(&profile_dir)?;
        builder = builder
            .user_data_dir(profile_dir)
            .window_size(cfg.viewport.0, cfg.viewport.1)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });
        let page = browser.new_page("about:blank").await?;
        Self::prepare(browser, page, cfg).await
    }

    /// Attaches to an already running Chromium over its DevTools websocket.
    pub async fn connect(ws_url: &str, cfg: BrowserConfig) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url).await?;
        tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });
        let existing = browser.pages().await?.into_iter().next();
        let page = match existing {
            Some(page) => page,
            None => browser.new_page("about:blank").await?,
        };
        Self::prepare(browser, page, cfg).await
    }

    async fn prepare(browser: OxideBrowser, page: Page, cfg: BrowserConfig) -> Result<Self> {
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        let (w, h) = cfg.viewport;
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(w))
            .height(i64::from(h))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!(e))?;
        page.execute(metrics).await?;
        debug!(width = w, height = h, "browser viewport set");
        Ok(Self {
            page,
            viewport: cfg.viewport,
            pointer: Mutex::new((f64::from(w) / 2.0, f64::from(h) / 2.0)),
            clicks: Mutex::new(ClickTracker::default()),
            _browser: browser,
        })
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder().full_page(false).build();
        Ok(self.page.screenshot(params).await?)
    }

    fn to_css(&self, point: NormalizedPoint) -> (f64, f64) {
        let (px, py) = point.to_pixel(self.viewport.0, self.viewport.1);
        (f64::from(px), f64::from(py))
    }

    fn pointer(&self) -> (f64, f64) {
        *self.pointer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_pointer(&self, at: (f64, f64)) {
        *self.pointer.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    /// `buttons` is the mask held after the event; `click_count` is set
    /// for press and release only.
    async fn mouse(
        &self,
        kind: DispatchMouseEventType,
        at: (f64, f64),
        button: Option<MouseButton>,
        buttons: i64,
        click_count: Option<i64>,
    ) -> Result<()> {
        let mut cmd = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(at.0)
            .y(at.1)
            .buttons(buttons);
        if let Some(b) = button {
            cmd = cmd.button(cdp_button(b));
        }
        if let Some(n) = click_count {
            cmd = cmd.click_count(n);
        }
        self.page.execute(cmd.build().map_err(|e| anyhow!(e))?).await?;
        Ok(())
    }

    fn clicks(&self) -> std::sync::MutexGuard<'_, ClickTracker> {
        self.clicks.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn wheel(&self, delta: i32) -> Result<()> {
        let at = self.pointer();
        // Wheel deltas are positive-up here and positive-down in CDP.
        let cmd = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(at.0)
            .y(at.1)
            .delta_x(0.0)
            .delta_y(-f64::from(delta))
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page.execute(cmd).await?;
        Ok(())
    }

    async fn key(&self, kind: DispatchKeyEventType, def: &KeyDef, modifiers: i64) -> Result<()> {
        let mut cmd = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(def.key.clone())
            .code(def.code.clone())
            .windows_virtual_key_code(def.vk)
            .modifiers(modifiers);
        if let (DispatchKeyEventType::KeyDown, Some(text), 0) = (&kind, &def.text, modifiers) {
            cmd = cmd.text(text.clone());
        }
        self.page.execute(cmd.build().map_err(|e| anyhow!(e))?).await?;
        Ok(())
    }

    async fn tap(&self, def: &KeyDef, modifiers: i64) -> Result<()> {
        self.key(DispatchKeyEventType::KeyDown, def, modifiers).await?;
        self.key(DispatchKeyEventType::KeyUp, def, modifiers).await
    }

    async fn chord(&self, keys: &[String]) -> Result<()> {
        let mut held: Vec<(KeyDef, i64)> = Vec::new();
        let mut mask = 0i64;
        for name in keys {
            let def = key_definition(name).ok_or_else(|| anyhow!("unsupported key '{}'", name))?;
            match modifier_bit(name) {
                Some(bit) => {
                    mask |= bit;
                    self.key(DispatchKeyEventType::KeyDown, &def, mask).await?;
                    held.push((def, bit));
                }
                None => self.tap(&def, mask).await?,
            }
        }
        for (def, bit) in held.iter().rev() {
            mask &= !bit;
            self.key(DispatchKeyEventType::KeyUp, def, mask).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ScreenSource for Browser {
    async fn capture(&self) -> Result<Frame, AgentError> {
        let png = self
            .screenshot_png()
            .await
            .map_err(|e| AgentError::Capture(e.to_string()))?;
        Frame::from_encoded(&png).map_err(|e| AgentError::Capture(format!("{:#}", e)))
    }
}

fn actuation(e: anyhow::Error) -> AgentError {
    AgentError::Actuation(format!("{:#}", e))
}

#[async_trait]
impl Actuator for Browser {
    async fn move_to(&self, point: NormalizedPoint) -> Result<(), AgentError> {
        let at = self.to_css(point);
        self.mouse(DispatchMouseEventType::MouseMoved, at, None, 0, None)
            .await
            .map_err(actuation)?;
        self.set_pointer(at);
        Ok(())
    }

    async fn button_down(&self, button: MouseButton) -> Result<(), AgentError> {
        let at = self.pointer();
        let count = self.clicks().press(button, at, Instant::now());
        self.mouse(DispatchMouseEventType::MousePressed, at, Some(button), buttons_mask(button), Some(count))
            .await
            .map_err(actuation)
    }

    async fn button_up(&self, button: MouseButton) -> Result<(), AgentError> {
        let count = self.clicks().release();
        self.mouse(DispatchMouseEventType::MouseReleased, self.pointer(), Some(button), 0, Some(count))
            .await
            .map_err(actuation)
    }

    async fn drag_to(&self, point: NormalizedPoint, button: MouseButton) -> Result<(), AgentError> {
        let at = self.to_css(point);
        self.mouse(DispatchMouseEventType::MouseMoved, at, Some(button), buttons_mask(button), None)
            .await
            .map_err(actuation)?;
        self.set_pointer(at);
        Ok(())
    }

    async fn scroll(&self, delta: i32) -> Result<(), AgentError> {
        self.wheel(delta).await.map_err(actuation)
    }

    async fn type_text(&self, text: &str) -> Result<(), AgentError> {
        self.page
            .execute(InsertTextParams { text: text.to_string() })
            .await
            .map_err(|e| AgentError::Actuation(e.to_string()))?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AgentError> {
        let def = key_definition(key)
            .ok_or_else(|| AgentError::Actuation(format!("unsupported key '{}'", key)))?;
        self.tap(&def, 0).await.map_err(actuation)
    }

    async fn hotkey(&self, keys: &[String]) -> Result<(), AgentError> {
        self.chord(keys).await.map_err(actuation)
    }
}

// ========================= Multi-click =========================

const MULTI_CLICK_INTERVAL: Duration = Duration::from_millis(500);
const MULTI_CLICK_SLOP: f64 = 4.0;

/// Derives CDP `clickCount` from consecutive presses, so two press/release
/// pairs at one spot arrive as a double click.
#[derive(Debug, Default)]
struct ClickTracker {
    last: Option<(MouseButton, (f64, f64), Instant)>,
    count: i64,
}

impl ClickTracker {
    fn press(&mut self, button: MouseButton, at: (f64, f64), now: Instant) -> i64 {
        let repeat = matches!(self.last, Some((b, p, t))
            if b == button
                && (p.0 - at.0).abs() <= MULTI_CLICK_SLOP
                && (p.1 - at.1).abs() <= MULTI_CLICK_SLOP
                && now.saturating_duration_since(t) <= MULTI_CLICK_INTERVAL);
        self.count = if repeat { self.count + 1 } else { 1 };
        self.last = Some((button, at, now));
        self.count
    }

    fn release(&self) -> i64 {
        self.count.max(1)
    }
}

// ========================= Key Table =========================

#[derive(Clone, Debug, PartialEq, Eq)]
struct KeyDef {
    key: String,
    code: String,
    vk: i64,
    text: Option<String>,
}

impl KeyDef {
    fn named(key: &str, code: &str, vk: i64) -> Self {
        Self { key: key.into(), code: code.into(), vk, text: None }
    }
}

fn cdp_button(button: MouseButton) -> CdpButton {
    match button {
        MouseButton::Primary => CdpButton::Left,
        MouseButton::Secondary => CdpButton::Right,
        MouseButton::Middle => CdpButton::Middle,
    }
}

fn buttons_mask(button: MouseButton) -> i64 {
    match button {
        MouseButton::Primary => 1,
        MouseButton::Secondary => 2,
        MouseButton::Middle => 4,
    }
}

/// CDP modifier flags: Alt=1, Ctrl=2, Meta=4, Shift=8.
fn modifier_bit(name: &str) -> Option<i64> {
    match name.trim().to_ascii_lowercase().as_str() {
        "alt" | "option" => Some(1),
        "ctrl" | "control" => Some(2),
        "meta" | "super" | "cmd" | "win" => Some(4),
        "shift" => Some(8),
        _ => None,
    }
}

/// Maps the action vocabulary's key names onto DOM key descriptors.
fn key_definition(name: &str) -> Option<KeyDef> {
    let lower = name.trim().to_ascii_lowercase();
    let def = match lower.as_str() {
        "enter" | "return" => KeyDef { text: Some("\r".into()), ..KeyDef::named("Enter", "Enter", 13) },
        "tab" => KeyDef::named("Tab", "Tab", 9),
        "esc" | "escape" => KeyDef::named("Escape", "Escape", 27),
        "backspace" => KeyDef::named("Backspace", "Backspace", 8),
        "delete" | "del" => KeyDef::named("Delete", "Delete", 46),
        "up" => KeyDef::named("ArrowUp", "ArrowUp", 38),
        "down" => KeyDef::named("ArrowDown", "ArrowDown", 40),
        "left" => KeyDef::named("ArrowLeft", "ArrowLeft", 37),
        "right" => KeyDef::named("ArrowRight", "ArrowRight", 39),
        "home" => KeyDef::named("Home", "Home", 36),
        "end" => KeyDef::named("End", "End", 35),
        "pageup" => KeyDef::named("PageUp", "PageUp", 33),
        "pagedown" => KeyDef::named("PageDown", "PageDown", 34),
        "space" => KeyDef { text: Some(" ".into()), ..KeyDef::named(" ", "Space", 32) },
        "f11" => KeyDef::named("F11", "F11", 122),
        "alt" | "option" => KeyDef::named("Alt", "AltLeft", 18),
        "ctrl" | "control" => KeyDef::named("Control", "ControlLeft", 17),
        "shift" => KeyDef::named("Shift", "ShiftLeft", 16),
        "meta" | "super" | "cmd" | "win" => KeyDef::named("Meta", "MetaLeft", 91),
        _ => {
            let mut chars = lower.chars();
            let c = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            let code = if c.is_ascii_alphabetic() {
                format!("Key{}", c.to_ascii_uppercase())
            } else if c.is_ascii_digit() {
                format!("Digit{}", c)
            } else {
                String::new()
            };
            let vk = if c.is_ascii_alphanumeric() { i64::from(c.to_ascii_uppercase() as u8) } else { 0 };
            KeyDef { key: c.to_string(), code, vk, text: Some(c.to_string()) }
        }
    };
    Some(def)
}
