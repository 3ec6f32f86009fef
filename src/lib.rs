pub mod action;
pub mod agent;
pub mod browser;
pub mod coords;
pub mod guard;
pub mod history;
pub mod input;
pub mod model;
pub mod session;
pub mod viewport;
pub mod vision;

pub use action::{Action, ActionKind, HistoryEntry, MouseButton};
pub use agent::{
    execute_action, Actuator, Agent, AgentConfig, AgentError, Reasoner, RunEvent, RunMetrics,
    RunOutcome, RunReport, ScreenSource, StopFlag,
};
pub use browser::{Browser, BrowserConfig};
pub use coords::{extract_point, validate_xy, InvalidCoords, NormalizedPoint};
pub use guard::RepeatGuard;
pub use history::{trim, History};
pub use input::{InputOutcome, InputTranslator, Key, KeyEvent, Modifiers, PointerEvent, RawButton};
pub use model::{VisionClient, VisionConfig};
pub use session::{RefreshConfig, Session, SessionError};
pub use viewport::{CropRect, ViewportMapper, ViewportTransform};
pub use vision::Frame;
