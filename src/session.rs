use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::agent::{Actuator, Agent, AgentError, Reasoner, RunReport, ScreenSource, StopFlag};
use crate::vision::Frame;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a run is already in progress")]
    Busy,
    #[error("objective is empty")]
    EmptyObjective,
}

#[derive(Clone, Debug)]
pub struct RefreshConfig {
    pub idle_interval: Duration,
    /// Slower polling while a run competes for the capture endpoint.
    pub busy_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(350),
            busy_interval: Duration::from_millis(650),
        }
    }
}

/// Supervises at most one objective run at a time and the live frame feed.
pub struct Session<C, R>
where
    C: ScreenSource + Actuator + Clone + 'static,
    R: Reasoner + 'static,
{
    agent: Arc<Agent<C, R>>,
    computer: C,
    stop: StopFlag,
    busy: Arc<watch::Sender<bool>>,
}

impl<C, R> Session<C, R>
where
    C: ScreenSource + Actuator + Clone + 'static,
    R: Reasoner + 'static,
{
    pub fn new(computer: C, agent: Agent<C, R>) -> Self {
        let (busy, _) = watch::channel(false);
        Self { agent: Arc::new(agent), computer, stop: StopFlag::new(), busy: Arc::new(busy) }
    }

    /// Spawns a run on a worker task. Rejected, not queued, while another run is active.
    pub fn start(
        &self,
        objective: &str,
    ) -> Result<JoinHandle<Result<RunReport, AgentError>>, SessionError> {
        let objective = objective.trim().to_string();
        if objective.is_empty() {
            return Err(SessionError::EmptyObjective);
        }
        let claimed = self.busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !claimed {
            return Err(SessionError::Busy);
        }

        self.stop.reset();
        let agent = Arc::clone(&self.agent);
        let stop = self.stop.clone();
        let guard = BusyGuard(Arc::clone(&self.busy));
        info!(objective = %objective, "run requested");

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let result = agent.run(&objective, &stop).await;
            if let Err(e) = &result {
                error!("run failed: {}", e);
            }
            result
        }))
    }

    /// Cooperative; takes effect at the next step boundary.
    pub fn stop(&self) {
        if self.is_busy() {
            info!("stop signal sent");
        }
        self.stop.stop();
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    pub fn busy_watch(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    pub fn computer(&self) -> &C {
        &self.computer
    }

    /// Polls the environment for full-resolution frames independently of any
    /// run. The task ends once every receiver is dropped.
    pub fn spawn_frame_refresh(
        &self,
        cfg: RefreshConfig,
    ) -> (watch::Receiver<Option<Arc<Frame>>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(None);
        let computer = self.computer.clone();
        let busy = self.busy.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let interval = if *busy.borrow() { cfg.busy_interval } else { cfg.idle_interval };
                sleep(interval).await;
                if tx.is_closed() {
                    break;
                }
                match computer.capture().await {
                    Ok(frame) => {
                        tx.send_replace(Some(Arc::new(frame)));
                    }
                    Err(e) => debug!("frame refresh skipped: {}", e),
                }
            }
        });
        (rx, handle)
    }
}

struct BusyGuard(Arc<watch::Sender<bool>>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}
