use async_trait::async_trait;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionKind, HistoryEntry, MouseButton};
use crate::coords::{extract_point, validate_xy, NormalizedPoint, PointSource};
use crate::guard::RepeatGuard;
use crate::history::History;
use crate::vision::{save_preview, Frame};

// ========================= Core Types =========================

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum AgentError {
    #[error("capture error: {0}")]
    Capture(String),
    #[error("reasoner error: {0}")]
    Reasoner(String),
    #[error("actuation error: {0}")]
    Actuation(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("other error: {0}")]
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Completed,
    Stopped,
    Error,
    MaxSteps,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Completed => "COMPLETED",
            RunOutcome::Stopped => "STOPPED",
            RunOutcome::Error => "ERROR",
            RunOutcome::MaxSteps => "MAX_STEPS",
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    pub steps: usize,
    pub clicks: usize,
    pub types: usize,
    pub invalid_coords: usize,
    pub defaulted_coords: usize,
    pub model_latency_ms: u128,
    pub time_ms: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub objective: String,
    pub outcome: RunOutcome,
    pub reason: String,
    /// Step number the run ended on.
    pub final_step: usize,
    pub metrics: RunMetrics,
    pub history: Vec<HistoryEntry>,
}

/// Live status stream for an operator-facing surface.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StepStarted { step: usize },
    Decision { step: usize, action: Action, latency_ms: u128 },
    InvalidCoords { step: usize, attempt: usize, reason: String },
    CoordsDefaulted { step: usize },
    Preview { step: usize, path: PathBuf },
    Finished { outcome: RunOutcome, reason: String },
}

/// Cooperative cancellation shared between the operator and the loop.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ========================= Pluggable Subsystems =========================

#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn capture(&self) -> Result<Frame, AgentError>;
}

/// Input side of the environment. Coordinates are always normalized.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn move_to(&self, point: NormalizedPoint) -> Result<(), AgentError>;
    async fn button_down(&self, button: MouseButton) -> Result<(), AgentError>;
    async fn button_up(&self, button: MouseButton) -> Result<(), AgentError>;
    async fn drag_to(&self, point: NormalizedPoint, button: MouseButton) -> Result<(), AgentError>;
    async fn scroll(&self, delta: i32) -> Result<(), AgentError>;
    async fn type_text(&self, text: &str) -> Result<(), AgentError>;
    async fn press_key(&self, key: &str) -> Result<(), AgentError>;
    async fn hotkey(&self, keys: &[String]) -> Result<(), AgentError>;
}

/// Model invocation. Returns the raw decision mapping; the loop does all
/// normalization and validation.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn decide(
        &self,
        objective: &str,
        frame_path: &Path,
        history: &[Value],
    ) -> Result<Value, AgentError>;
}

#[async_trait]
impl<T: ScreenSource + ?Sized> ScreenSource for Arc<T> {
    async fn capture(&self) -> Result<Frame, AgentError> {
        (**self).capture().await
    }
}

#[async_trait]
impl<T: Actuator + ?Sized> Actuator for Arc<T> {
    async fn move_to(&self, point: NormalizedPoint) -> Result<(), AgentError> {
        (**self).move_to(point).await
    }
    async fn button_down(&self, button: MouseButton) -> Result<(), AgentError> {
        (**self).button_down(button).await
    }
    async fn button_up(&self, button: MouseButton) -> Result<(), AgentError> {
        (**self).button_up(button).await
    }
    async fn drag_to(&self, point: NormalizedPoint, button: MouseButton) -> Result<(), AgentError> {
        (**self).drag_to(point, button).await
    }
    async fn scroll(&self, delta: i32) -> Result<(), AgentError> {
        (**self).scroll(delta).await
    }
    async fn type_text(&self, text: &str) -> Result<(), AgentError> {
        (**self).type_text(text).await
    }
    async fn press_key(&self, key: &str) -> Result<(), AgentError> {
        (**self).press_key(key).await
    }
    async fn hotkey(&self, keys: &[String]) -> Result<(), AgentError> {
        (**self).hotkey(keys).await
    }
}

#[async_trait]
impl<T: Reasoner + ?Sized> Reasoner for Arc<T> {
    async fn decide(
        &self,
        objective: &str,
        frame_path: &Path,
        history: &[Value],
    ) -> Result<Value, AgentError> {
        (**self).decide(objective, frame_path, history).await
    }
}

// ========================= Configuration =========================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// Extra model queries allowed when a pointer action has bad coordinates.
    pub model_retry: usize,
    /// Also spend the retry budget on unrecognized action kinds.
    pub retry_on_invalid_action: bool,
    pub wait_before_capture: Duration,
    /// Longest side of the frame handed to the model.
    pub max_dim: u32,
    pub history_window: usize,
    pub screenshot_path: PathBuf,
    /// `{i}` is replaced by the step number. `None` disables previews.
    pub preview_path_template: Option<String>,
    pub max_wait: Duration,
    pub repeat_guard: RepeatGuard,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let dir = std::env::temp_dir().join("sandbox-pilot");
        Self {
            max_steps: 30,
            model_retry: 2,
            retry_on_invalid_action: false,
            wait_before_capture: Duration::from_millis(800),
            max_dim: 1280,
            history_window: 6,
            screenshot_path: dir.join("screen.png"),
            preview_path_template: Some(dir.join("preview_{i}.png").to_string_lossy().into_owned()),
            max_wait: Duration::from_secs(10),
            repeat_guard: RepeatGuard::default(),
        }
    }
}

impl AgentConfig {
    /// Defaults overlaid with `PILOT_*` environment variables. Unparseable
    /// values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse::<usize>("PILOT_MAX_STEPS") {
            cfg.max_steps = n;
        }
        if let Some(n) = env_parse::<usize>("PILOT_MODEL_RETRY") {
            cfg.model_retry = n;
        }
        if let Some(ms) = env_parse::<u64>("PILOT_WAIT_BEFORE_CAPTURE_MS") {
            cfg.wait_before_capture = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("PILOT_MAX_DIM") {
            cfg.max_dim = n;
        }
        if let Ok(p) = std::env::var("PILOT_SCREENSHOT_PATH") {
            cfg.screenshot_path = PathBuf::from(p);
        }
        if let Ok(t) = std::env::var("PILOT_PREVIEW_TEMPLATE") {
            cfg.preview_path_template = if t.trim().is_empty() { None } else { Some(t) };
        }
        cfg
    }

    pub fn preview_path(&self, step: usize) -> Option<PathBuf> {
        self.preview_path_template
            .as_ref()
            .map(|t| PathBuf::from(t.replace("{i}", &step.to_string())))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// ========================= Agent Core =========================

/// Mutable bookkeeping for one run; consumed by `finish`.
struct RunState {
    run_id: String,
    objective: String,
    step: usize,
    metrics: RunMetrics,
    history: History,
    started: Instant,
}

impl RunState {
    fn new(objective: &str) -> Self {
        Self {
            run_id: nanoid!(),
            objective: objective.to_string(),
            step: 1,
            metrics: RunMetrics::default(),
            history: History::new(),
            started: Instant::now(),
        }
    }
}

enum Decision {
    Act(Action, Option<NormalizedPoint>),
    Done,
    Exhausted,
}

pub struct Agent<C, R>
where
    C: ScreenSource + Actuator,
    R: Reasoner,
{
    computer: C,
    reasoner: R,
    cfg: AgentConfig,
    events: Option<UnboundedSender<RunEvent>>,
}

impl<C, R> Agent<C, R>
where
    C: ScreenSource + Actuator,
    R: Reasoner,
{
    pub fn new(computer: C, reasoner: R, cfg: AgentConfig) -> Self {
        Self { computer, reasoner, cfg, events: None }
    }

    pub fn with_events(mut self, tx: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    /// Drives the environment toward `objective` until a terminal outcome.
    ///
    /// Terminal outcomes come back as `Ok(RunReport)`. Capture, model and
    /// actuation failures are returned as `Err` without any recovery attempt.
    pub async fn run(&self, objective: &str, stop: &StopFlag) -> Result<RunReport, AgentError> {
        let mut state = RunState::new(objective);
        info!(run_id = %state.run_id, objective = %objective, "run started");

        loop {
            let step = state.step;
            if stop.is_set() {
                return Ok(self.finish(state, RunOutcome::Stopped, "stopped by operator".into()));
            }

            info!(step, "agent step");
            self.emit(RunEvent::StepStarted { step });
            sleep(self.cfg.wait_before_capture).await;

            let frame = self.computer.capture().await?.downscaled(self.cfg.max_dim);
            frame
                .save_png(&self.cfg.screenshot_path)
                .await
                .map_err(|e| AgentError::Io(e.to_string()))?;

            let (action, point) = match self.decide(objective, &mut state).await? {
                Decision::Act(action, point) => (action, point),
                Decision::Done => {
                    return Ok(self.finish(state, RunOutcome::Completed, "done".into()));
                }
                Decision::Exhausted => {
                    let reason = format!("no valid action after {} attempts", self.cfg.model_retry + 1);
                    return Ok(self.finish(state, RunOutcome::Error, reason));
                }
            };

            if let Some(reason) = self.cfg.repeat_guard.should_stop(state.history.entries(), &action) {
                warn!(step, reason = %reason, "repeat guard tripped");
                return Ok(self.finish(state, RunOutcome::Completed, reason));
            }

            if let (Some(point), Some(path)) = (point, self.cfg.preview_path(step)) {
                match save_preview(&frame, point, &path).await {
                    Ok(()) => {
                        debug!(step, path = %path.display(), point = %point, "preview written");
                        self.emit(RunEvent::Preview { step, path });
                    }
                    Err(e) => warn!(step, "preview failed: {:#}", e),
                }
            }

            execute_action(&self.computer, &action, point, self.cfg.max_wait).await?;
            info!(step, action = %action.kind, "action executed");

            state.metrics.steps += 1;
            if action.kind.is_pointer() {
                state.metrics.clicks += 1;
            }
            if action.kind == ActionKind::Type {
                state.metrics.types += 1;
            }
            state.history.record(action);

            state.step += 1;
            if state.step > self.cfg.max_steps {
                state.step = self.cfg.max_steps;
                let reason = format!("step budget of {} exhausted", self.cfg.max_steps);
                return Ok(self.finish(state, RunOutcome::MaxSteps, reason));
            }
        }
    }

    async fn decide(&self, objective: &str, state: &mut RunState) -> Result<Decision, AgentError> {
        let step = state.step;
        let RunState { history, metrics, .. } = state;
        for attempt in 0..=self.cfg.model_retry {
            let asked = Instant::now();
            let context = history.context(self.cfg.history_window);
            let raw = self
                .reasoner
                .decide(objective, &self.cfg.screenshot_path, &context)
                .await?;
            let latency_ms = asked.elapsed().as_millis();
            metrics.model_latency_ms += latency_ms;

            let mut action = Action::from_raw(raw);
            info!(step, attempt, action = %action.kind, detail = ?action.detail, latency_ms, "model decision");

            if action.kind == ActionKind::Done {
                return Ok(Decision::Done);
            }

            if action.kind.is_pointer() {
                let found = extract_point(&action.raw);
                if found.source == PointSource::Defaulted {
                    metrics.defaulted_coords += 1;
                    warn!(step, attempt, "no usable coordinates in model output, using screen center");
                    self.emit(RunEvent::CoordsDefaulted { step });
                }
                match validate_xy(found.x, found.y) {
                    Ok(point) => {
                        action.x = Some(point.x());
                        action.y = Some(point.y());
                        self.emit(RunEvent::Decision { step, action: action.clone(), latency_ms });
                        return Ok(Decision::Act(action, Some(point)));
                    }
                    Err(e) => {
                        warn!(step, attempt, "invalid coordinates ({}), asking again", e);
                        metrics.invalid_coords += 1;
                        self.emit(RunEvent::InvalidCoords { step, attempt, reason: e.to_string() });
                        history.push(HistoryEntry::InvalidCoords { reason: e.to_string(), raw: action.raw });
                        continue;
                    }
                }
            }

            if let ActionKind::Unknown(kind) = &action.kind {
                if self.cfg.retry_on_invalid_action {
                    warn!(step, attempt, kind = %kind, "unknown action kind, asking again");
                    let kind = kind.clone();
                    history.push(HistoryEntry::InvalidAction { kind, raw: action.raw });
                    continue;
                }
            }

            self.emit(RunEvent::Decision { step, action: action.clone(), latency_ms });
            return Ok(Decision::Act(action, None));
        }
        Ok(Decision::Exhausted)
    }

    fn finish(&self, state: RunState, outcome: RunOutcome, reason: String) -> RunReport {
        let RunState { run_id, objective, step, mut metrics, history, started } = state;
        metrics.time_ms = started.elapsed().as_millis();
        info!(run_id = %run_id, outcome = %outcome, reason = %reason, steps = metrics.steps, "run finished");
        self.emit(RunEvent::Finished { outcome, reason: reason.clone() });
        RunReport {
            run_id,
            objective,
            outcome,
            reason,
            final_step: step,
            metrics,
            history: history.into_entries(),
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

// ========================= Action Execution =========================

/// Performs one validated action against the environment.
pub async fn execute_action<A: Actuator + ?Sized>(
    actuator: &A,
    action: &Action,
    point: Option<NormalizedPoint>,
    max_wait: Duration,
) -> Result<(), AgentError> {
    match &action.kind {
        ActionKind::Click | ActionKind::DoubleClick | ActionKind::RightClick => {
            let point = match point {
                Some(p) => p,
                None => pointer_of(action)?,
            };
            let (button, presses) = match action.kind {
                ActionKind::DoubleClick => (MouseButton::Primary, 2),
                ActionKind::RightClick => (MouseButton::Secondary, 1),
                _ => (MouseButton::Primary, 1),
            };
            actuator.move_to(point).await?;
            for _ in 0..presses {
                actuator.button_down(button).await?;
                actuator.button_up(button).await?;
            }
        }
        ActionKind::Type => match action.text.as_deref() {
            Some(text) if !text.is_empty() => actuator.type_text(text).await?,
            _ => warn!("TYPE without text, skipped"),
        },
        ActionKind::Press => match action.key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => actuator.press_key(&key.to_ascii_lowercase()).await?,
            _ => warn!("PRESS without key, skipped"),
        },
        ActionKind::Hotkey => {
            if action.keys.is_empty() {
                warn!("HOTKEY without keys, skipped");
            } else {
                let keys: Vec<String> = action.keys.iter().map(|k| k.to_ascii_lowercase()).collect();
                actuator.hotkey(&keys).await?;
            }
        }
        ActionKind::Scroll => actuator.scroll(action.scroll_delta()).await?,
        ActionKind::Wait => {
            let secs = action.seconds.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(1.0);
            // Clamp before converting; huge values overflow `Duration`.
            sleep(Duration::from_secs_f64(secs.min(max_wait.as_secs_f64()))).await;
        }
        ActionKind::Noop => {}
        ActionKind::Unknown(kind) => warn!(kind = %kind, "unknown action kind ignored"),
        ActionKind::Done => {}
    }
    Ok(())
}

fn pointer_of(action: &Action) -> Result<NormalizedPoint, AgentError> {
    match (action.x, action.y) {
        (Some(x), Some(y)) => validate_xy(x, y).map_err(|e| AgentError::Other(e.to_string())),
        _ => Err(AgentError::Other(format!("{} without coordinates", action.kind))),
    }
}
