//! Worker process driver.
//!
//! State transitions:
//! ```text
//! STARTING → PUBLISHING → SERVING → {SIGNALED | SHUTTING_DOWN} → STOPPED
//!                 ↓           ↓
//!              STOPPED     STOPPED
//! ```
//! Termination is external: the worker only stops on its own after a fatal
//! startup error.

use std::future::Future;
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::bz2::{Bz2Service, StreamLibrary};
use crate::crash;
use crate::endpoint::Endpoint;
use crate::handshake::SideChannel;
use crate::ipc::IpcServer;
use crate::types::{Config, Error, Result, ServerConfig, NONCE_FD_ENV};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Starting,
    Publishing,
    Serving,
    Signaled,
    ShuttingDown,
    Stopped,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        self == WorkerState::Stopped
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Starting, Publishing)
                | (Publishing, Serving)
                | (Publishing, Stopped)
                | (Serving, Signaled)
                | (Serving, ShuttingDown)
                | (Serving, Stopped)
                | (Signaled, Stopped)
                | (ShuttingDown, Stopped)
        )
    }
}

/// Why serving ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Termination signal from the supervisor, by name.
    Signal(&'static str),
    /// Shutdown requested in-process.
    Shutdown,
}

impl StopReason {
    fn state(self) -> WorkerState {
        match self {
            StopReason::Signal(_) => WorkerState::Signaled,
            StopReason::Shutdown => WorkerState::ShuttingDown,
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: WorkerState::Starting,
        }
    }

    fn advance(&mut self, to: WorkerState) {
        if !self.state.can_transition_to(to) {
            tracing::warn!("unexpected worker transition {:?} -> {:?}", self.state, to);
        }
        tracing::debug!("worker {:?} -> {:?}", self.state, to);
        self.state = to;
    }
}

/// SIGTERM and SIGINT listeners, registered before the endpoint exists.
#[derive(Debug)]
pub struct TerminationSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl TerminationSignals {
    pub fn install() -> Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    pub async fn recv(&mut self) -> StopReason {
        tokio::select! {
            _ = self.terminate.recv() => StopReason::Signal("SIGTERM"),
            _ = self.interrupt.recv() => StopReason::Signal("SIGINT"),
        }
    }
}

/// In-process shutdown trigger, for embedders and tests.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn wait(&self) -> StopReason {
        self.token.cancelled().await;
        StopReason::Shutdown
    }
}

/// Run the worker until SIGTERM or SIGINT.
pub async fn run(config: Config, library: Arc<dyn StreamLibrary>) -> Result<()> {
    let mut signals = TerminationSignals::install()?;
    run_until(config, library, async move { signals.recv().await }).await
}

/// Run the worker until `stop` resolves.
pub async fn run_until<F>(config: Config, library: Arc<dyn StreamLibrary>, stop: F) -> Result<()>
where
    F: Future<Output = StopReason>,
{
    let mut lifecycle = Lifecycle::new();
    crash::install();

    lifecycle.advance(WorkerState::Publishing);
    let endpoint = match publish_endpoint(&config.server) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            lifecycle.advance(WorkerState::Stopped);
            return Err(e);
        }
    };

    lifecycle.advance(WorkerState::Serving);
    let server = IpcServer::new(Bz2Service::new(library), config.ipc.clone());
    let (listener, guard) = endpoint.into_listener();
    let serve = server.serve(listener);
    tokio::pin!(serve);
    tokio::pin!(stop);

    let result = tokio::select! {
        result = &mut serve => result,
        reason = &mut stop => {
            tracing::info!("stopping: {:?}", reason);
            lifecycle.advance(reason.state());
            server.shutdown();
            serve.await
        }
    };

    tracing::debug!("closing {}", guard.address());
    drop(guard);
    lifecycle.advance(WorkerState::Stopped);
    result.map_err(Error::from)
}

/// Take the side channel, bind the endpoint and announce it.
///
/// The side channel is checked before anything is bound, so a missing or
/// unusable descriptor leaves no socket behind. If publishing fails the
/// endpoint is dropped and its directory removed.
pub fn publish_endpoint(config: &ServerConfig) -> Result<Endpoint> {
    let fd = config
        .nonce_fd
        .ok_or_else(|| Error::config(format!("{} is not set", NONCE_FD_ENV)))?;
    let channel = SideChannel::from_raw(fd)?;
    let endpoint = Endpoint::bind(config)?;
    channel.publish(endpoint.address())?;
    tracing::info!("published {} on descriptor {}", endpoint.address(), fd);
    Ok(endpoint)
}
