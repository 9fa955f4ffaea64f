//! The engine's event loop.
//!
//! One task owns the [`Orchestrator`] and applies commands to it in arrival
//! order, so request state is never touched concurrently. Callers talk to it
//! through a cloneable [`EngineHandle`].

use std::time::Duration;

use capability::{HostAnswer, SurfaceId};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::{Error, Orchestrator, RequestDescriptor, RequestId, Result, Submitted};

/// A unit of work for the event loop.
enum Command {
    Submit {
        descriptor: RequestDescriptor,
        reply: oneshot::Sender<Result<Submitted>>,
    },
    Deliver {
        answer: HostAnswer,
        reply: oneshot::Sender<bool>,
    },
    DeliverTo {
        id: RequestId,
        answer: HostAnswer,
        reply: oneshot::Sender<bool>,
    },
    Cancel {
        id: RequestId,
        reply: oneshot::Sender<bool>,
    },
    CancelAllFor {
        surface: SurfaceId,
        reply: oneshot::Sender<usize>,
    },
    ActiveFor {
        surface: SurfaceId,
        reply: oneshot::Sender<Option<RequestId>>,
    },
    /// A scheduled prompt retry is due. Sent by the loop to itself.
    Retry { id: RequestId },
    Sweep {
        reply: oneshot::Sender<Vec<RequestId>>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

/// Runs the orchestrator until shut down.
///
/// ```ignore
/// let (event_loop, handle) = EventLoop::new(orchestrator);
/// tokio::spawn(event_loop.run());
///
/// let submitted = handle.submit(descriptor).await?;
/// handle.deliver(answer).await?;
/// ```
pub struct EventLoop {
    orchestrator: Orchestrator,
    rx: mpsc::UnboundedReceiver<Command>,
    /// For scheduling retries without keeping the loop alive.
    retries: mpsc::WeakUnboundedSender<Command>,
    sweep_interval: Duration,
}

impl EventLoop {
    pub fn new(orchestrator: Orchestrator) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sweep_interval = orchestrator
            .config()
            .requests
            .sweep_interval()
            .max(Duration::from_millis(1));
        let event_loop = Self {
            orchestrator,
            rx,
            retries: tx.downgrade(),
            sweep_interval,
        };
        (event_loop, EngineHandle { tx })
    }

    /// Process commands until a shutdown command arrives or every handle is
    /// dropped. Requests still in flight are cancelled on exit.
    pub async fn run(mut self) {
        info!(sweep_interval_ms = self.sweep_interval.as_millis() as u64, "event loop starting");

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        sweep.tick().await;

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        debug!("all handles dropped");
                        self.orchestrator.shutdown();
                        break;
                    };
                    if !self.handle(command) {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    self.orchestrator.sweep();
                }
            }
        }

        info!("event loop stopped");
    }

    /// Apply one command. Returns false once the loop should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Submit { descriptor, reply } => {
                let result = self.orchestrator.submit(descriptor);
                if let Ok(submitted) = &result {
                    if let Some(delay) = submitted.retry_after {
                        self.schedule_retry(submitted.id, delay);
                    }
                }
                let _ = reply.send(result);
            }
            Command::Deliver { answer, reply } => {
                let _ = reply.send(self.orchestrator.deliver(answer));
            }
            Command::DeliverTo { id, answer, reply } => {
                let _ = reply.send(self.orchestrator.deliver_to(id, answer));
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.orchestrator.cancel(id));
            }
            Command::CancelAllFor { surface, reply } => {
                let _ = reply.send(self.orchestrator.cancel_all_for(&surface));
            }
            Command::ActiveFor { surface, reply } => {
                let _ = reply.send(self.orchestrator.active_request_for(&surface));
            }
            Command::Retry { id } => {
                if let Some(delay) = self.orchestrator.retry(id) {
                    self.schedule_retry(id, delay);
                }
            }
            Command::Sweep { reply } => {
                let _ = reply.send(self.orchestrator.sweep());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(self.orchestrator.shutdown());
                return false;
            }
        }
        true
    }

    fn schedule_retry(&self, id: RequestId, delay: Duration) {
        let tx = self.retries.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Retry { id });
            }
        });
    }
}

/// Cloneable handle to a running [`EventLoop`].
///
/// Every method fails with [`Error::EngineStopped`] once the loop is gone.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| Error::EngineStopped)?;
        rx.await.map_err(|_| Error::EngineStopped)
    }

    /// Submit a request. See [`Orchestrator::submit`].
    pub async fn submit(&self, descriptor: RequestDescriptor) -> Result<Submitted> {
        self.call(|reply| Command::Submit { descriptor, reply })
            .await?
    }

    /// Deliver a host answer to whichever request it belongs to.
    pub async fn deliver(&self, answer: HostAnswer) -> Result<bool> {
        self.call(|reply| Command::Deliver { answer, reply }).await
    }

    pub async fn deliver_to(&self, id: RequestId, answer: HostAnswer) -> Result<bool> {
        self.call(|reply| Command::DeliverTo { id, answer, reply })
            .await
    }

    pub async fn cancel(&self, id: RequestId) -> Result<bool> {
        self.call(|reply| Command::Cancel { id, reply }).await
    }

    /// Cancel every request owned by `surface`, e.g. when it is destroyed.
    pub async fn cancel_all_for(&self, surface: impl Into<SurfaceId>) -> Result<usize> {
        let surface = surface.into();
        self.call(|reply| Command::CancelAllFor { surface, reply })
            .await
    }

    pub async fn active_request_for(&self, surface: impl Into<SurfaceId>) -> Result<Option<RequestId>> {
        let surface = surface.into();
        self.call(|reply| Command::ActiveFor { surface, reply })
            .await
    }

    /// Run an expiry sweep now instead of waiting for the next interval.
    pub async fn sweep(&self) -> Result<Vec<RequestId>> {
        self.call(|reply| Command::Sweep { reply }).await
    }

    /// Cancel everything and stop the loop.
    pub async fn shutdown(&self) -> Result<usize> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use capability::{
        ApiLevel, Capability, CapabilityResult, DeclarationValidator, HostState, Manifest,
        ScriptedHost, known,
    };
    use parking_lot::Mutex;

    use super::*;
    use crate::ui::UiProviders;
    use crate::{GrantlyConfig, RequestBuilder, RequestState};

    const APP: &str = "dev.grantly.demo";

    fn engine(host: Arc<ScriptedHost>) -> (EngineHandle, GrantlyConfig) {
        let mut config = GrantlyConfig::default();
        config.gate.min_request_interval_ms = 0;
        let manifest = Manifest::new(APP.into(), [known::CAMERA, known::MICROPHONE].map(Capability::from));
        let declarations = Arc::new(DeclarationValidator::new(APP.into(), Arc::new(manifest)));
        let orchestrator = Orchestrator::new(
            APP.into(),
            config.clone(),
            host,
            declarations,
            UiProviders::default(),
        );
        let (event_loop, handle) = EventLoop::new(orchestrator);
        tokio::spawn(event_loop.run());
        (handle, config)
    }

    fn collecting(
        config: &GrantlyConfig,
        sink: &Arc<Mutex<Vec<CapabilityResult>>>,
    ) -> RequestDescriptor {
        let sink = sink.clone();
        RequestBuilder::new("main", config)
            .capabilities([known::CAMERA])
            .callback(move |results: &[CapabilityResult]| sink.lock().extend_from_slice(results))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn submit_and_deliver_through_handle() {
        let mut state = HostState::default();
        state.grant_on_prompt.insert(known::CAMERA.into());
        let host = Arc::new(ScriptedHost::new(APP.into(), ApiLevel(34), state));
        let (handle, config) = engine(host.clone());
        let sink = Arc::new(Mutex::new(Vec::new()));

        let submitted = handle.submit(collecting(&config, &sink)).await.unwrap();
        assert_eq!(submitted.state, RequestState::AwaitingHost);
        assert_eq!(handle.active_request_for("main").await.unwrap(), Some(submitted.id));

        for (_, capabilities) in host.take_pending() {
            assert!(handle.deliver(host.answer(&capabilities)).await.unwrap());
        }
        assert!(sink.lock()[0].is_granted());
        assert_eq!(handle.active_request_for("main").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_prompt_is_retried_after_backoff() {
        let host = Arc::new(ScriptedHost::new(APP.into(), ApiLevel(34), HostState::default()));
        host.fail_next_prompts(1);
        let (handle, config) = engine(host.clone());
        let sink = Arc::new(Mutex::new(Vec::new()));

        let submitted = handle.submit(collecting(&config, &sink)).await.unwrap();
        let delay = submitted.retry_after.unwrap();
        assert_eq!(host.prompt_count(), 0);

        tokio::time::sleep(delay + Duration::from_millis(10)).await;
        // Let the loop process the retry command.
        handle.sweep().await.unwrap();
        assert_eq!(host.prompt_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let host = Arc::new(ScriptedHost::new(APP.into(), ApiLevel(34), HostState::default()));
        let (handle, config) = engine(host);
        let sink = Arc::new(Mutex::new(Vec::new()));

        handle.submit(collecting(&config, &sink)).await.unwrap();
        assert_eq!(handle.shutdown().await.unwrap(), 1);

        let err = handle.sweep().await.unwrap_err();
        assert!(matches!(err, Error::EngineStopped));
        assert!(sink.lock().is_empty());
    }
}
