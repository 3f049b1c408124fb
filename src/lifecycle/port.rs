//! ExternalPort: the lifecycle manager of one inbound port.
//!
//! # Responsibilities
//! - Own the I/O thread, which hosts the reactor and the accept loop
//! - Spawn and join the single worker for every run
//! - Keep the live reactor handle so another thread can stop it
//! - Rebuild everything from the current configuration on each start
//!
//! # Threads
//! ```text
//! caller ── start() ──▶ agent-port-io ──▶ reactor: accept → queue
//!                             │
//!                             └──▶ agent-port-worker: queue → reply → close
//! caller ── shutdown() ── flag + reactor stop ── join io (which joins worker)
//! ```

use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::config::validation::{join_errors, validate_config, ValidationError};
use crate::config::{PortConfig, SharedConfig};
use crate::lifecycle::reactor::ReactorHandle;
use crate::net::listener::{Acceptor, ListenerError};
use crate::net::queue::SessionQueue;
use crate::net::session::Session;
use crate::net::worker::{panic_message, Worker};
use crate::observability::metrics;
use crate::reply::Reply;
use crate::security::access_control::{AddressFilter, AllowList, NetworkParseError};

/// Error type for a single port run. Reported on the I/O thread.
#[derive(Debug, Error)]
pub enum PortError {
    /// The live configuration does not pass validation.
    #[error("invalid configuration: {}", join_errors(.0))]
    Config(Vec<ValidationError>),
    /// The current-thread runtime could not be built.
    #[error("failed to build reactor runtime: {0}")]
    Runtime(#[source] io::Error),
    /// Binding the listener failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// An `only_from` entry does not parse.
    #[error("only_from: {0}")]
    AllowList(#[from] NetworkParseError),
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Hooks for the component that owns a port.
///
/// Both run on the I/O thread.
pub trait PortOwner: Send + Sync {
    /// Called once per run, before any socket work.
    fn pre_context_call(&self) {}

    /// Called with the handle of the reactor that was just built.
    fn reactor_registered(&self, _handle: &ReactorHandle) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the manager and its I/O thread.
#[derive(Default)]
struct PortState {
    shutdown: Arc<AtomicBool>,
    reactor: Mutex<Option<ReactorHandle>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl PortState {
    fn register_reactor(&self, handle: ReactorHandle, owner: Option<&dyn PortOwner>) {
        if let Some(owner) = owner {
            owner.reactor_registered(&handle);
        }

        let mut slot = lock(&self.reactor);
        if self.shutdown.load(Ordering::SeqCst) {
            tracing::debug!("Shutdown requested before reactor registration");
            handle.stop();
        }
        *slot = Some(handle);
    }

    /// Returns `false` when the handle was already taken by a stop request.
    fn clear_reactor(&self) -> bool {
        lock(&self.reactor).take().is_some()
    }

    fn stop_execution(&self) -> bool {
        self.shutdown.store(true, Ordering::SeqCst);
        match lock(&self.reactor).take() {
            Some(handle) => handle.stop(),
            None => false,
        }
    }
}

/// Everything one run needs, resolved when the I/O thread starts.
struct RunSettings {
    ipv6: bool,
    port: u16,
    segment_size: usize,
    queue_capacity: usize,
    wake_delay: Duration,
    filter: Arc<dyn AddressFilter>,
}

impl RunSettings {
    fn resolve(
        config: &PortConfig,
        port_override: u16,
        filter: Option<Arc<dyn AddressFilter>>,
    ) -> Result<Self, PortError> {
        let filter: Arc<dyn AddressFilter> = match filter {
            Some(filter) => filter,
            None => {
                let allow_list = AllowList::from_entries(&config.only_from)?;
                if allow_list.is_empty() {
                    tracing::debug!("only_from is empty, every peer is admitted");
                }
                Arc::new(allow_list)
            }
        };
        let port = if port_override != 0 {
            port_override
        } else {
            config.port
        };

        Ok(Self {
            ipv6: config.ipv6,
            port,
            segment_size: config.segment_size,
            queue_capacity: config.queue_capacity,
            wake_delay: Duration::from_millis(config.wake_delay_ms),
            filter,
        })
    }
}

/// Inputs captured by `start` and moved onto the I/O thread.
struct IoContext {
    config: SharedConfig,
    port_override: u16,
    filter: Option<Arc<dyn AddressFilter>>,
    owner: Option<Arc<dyn PortOwner>>,
    reply: Arc<dyn Reply>,
}

/// Stops and joins the worker when a run ends, however it ends.
struct WorkerGuard {
    queue: Arc<SessionQueue<Session>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerGuard {
    fn spawn(
        queue: Arc<SessionQueue<Session>>,
        settings: &RunSettings,
        reply: Arc<dyn Reply>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, PortError> {
        let mut worker = Worker::new(
            Arc::clone(&queue),
            Arc::clone(&settings.filter),
            reply,
            Arc::clone(&shutdown),
            settings.wake_delay,
        );
        let handle = thread::Builder::new()
            .name("agent-port-worker".to_string())
            .spawn(move || worker.run())
            .map_err(PortError::Spawn)?;

        Ok(Self {
            queue,
            shutdown,
            handle: Some(handle),
        })
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.wake_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

fn enqueue(queue: &SessionQueue<Session>, session: Session) {
    let id = session.id();
    if queue.push(session) {
        metrics::record_queue_depth(queue.len());
    } else {
        tracing::debug!(
            connection_id = %id,
            capacity = queue.capacity(),
            "Session dropped, queue full"
        );
        metrics::record_dropped();
    }
}

/// Snapshot of the `[port]` section, rejected if the live config is invalid.
fn current_port_config(config: &SharedConfig) -> Result<PortConfig, PortError> {
    let config = config.load();
    validate_config(&config).map_err(PortError::Config)?;
    Ok(config.port.clone())
}

fn run_io(state: &PortState, ctx: IoContext) -> Result<(), PortError> {
    if let Some(owner) = &ctx.owner {
        owner.pre_context_call();
    }

    let port_config = current_port_config(&ctx.config)?;
    let settings = RunSettings::resolve(&port_config, ctx.port_override, ctx.filter)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PortError::Runtime)?;
    let acceptor = runtime.block_on(Acceptor::bind(
        settings.ipv6,
        settings.port,
        settings.segment_size,
    ))?;
    let local_addr = acceptor.local_addr().ok();
    *lock(&state.local_addr) = local_addr;

    let (handle, stop) = ReactorHandle::pair();
    state.register_reactor(handle, ctx.owner.as_deref());

    let queue = Arc::new(SessionQueue::new(settings.queue_capacity));
    let _worker = WorkerGuard::spawn(
        Arc::clone(&queue),
        &settings,
        ctx.reply,
        Arc::clone(&state.shutdown),
    )?;

    tracing::info!(
        address = ?local_addr,
        queue_capacity = settings.queue_capacity,
        segment_size = settings.segment_size,
        "IO started"
    );
    runtime.block_on(acceptor.run_accept(|session| enqueue(&queue, session), stop));
    Ok(())
}

fn io_thread_main(state: Arc<PortState>, ctx: IoContext) {
    match panic::catch_unwind(AssertUnwindSafe(|| run_io(&state, ctx))) {
        Ok(Ok(())) => tracing::info!("IO ends"),
        Ok(Err(e)) => tracing::error!(error = %e, "IO failed"),
        Err(payload) => tracing::error!(
            panic = panic_message(&*payload),
            "Unexpected panic in IO thread"
        ),
    }

    if !state.clear_reactor() {
        tracing::debug!("Reactor handle already released");
    }
    *lock(&state.local_addr) = None;
}

/// Inbound port: accepts connections and answers them through a [`Reply`].
pub struct ExternalPort {
    config: SharedConfig,
    port_override: u16,
    filter: Option<Arc<dyn AddressFilter>>,
    owner: Option<Arc<dyn PortOwner>>,
    state: Arc<PortState>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ExternalPort {
    /// A stopped port reading its settings from `config` at every start.
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            port_override: 0,
            filter: None,
            owner: None,
            state: Arc::new(PortState::default()),
            io_thread: Mutex::new(None),
        }
    }

    /// Listen on `port` instead of the configured one. `0` keeps the configured port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port_override = port;
        self
    }

    /// Register hooks that run on the I/O thread of every run.
    pub fn with_owner(mut self, owner: Arc<dyn PortOwner>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Replace the allow-list built from `only_from`.
    pub fn with_filter(mut self, filter: Arc<dyn AddressFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Spawn the I/O thread. Returns `false` if a run is still active.
    pub fn start(&self, reply: Arc<dyn Reply>) -> bool {
        let mut io_thread = lock(&self.io_thread);
        if io_thread.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("IO is already running");
            return false;
        }
        if let Some(finished) = io_thread.take() {
            if finished.join().is_err() {
                tracing::error!("Previous IO thread panicked");
            }
        }

        self.state.shutdown.store(false, Ordering::SeqCst);
        let ctx = IoContext {
            config: Arc::clone(&self.config),
            port_override: self.port_override,
            filter: self.filter.clone(),
            owner: self.owner.clone(),
            reply,
        };
        let state = Arc::clone(&self.state);

        match thread::Builder::new()
            .name("agent-port-io".to_string())
            .spawn(move || io_thread_main(state, ctx))
        {
            Ok(handle) => {
                *io_thread = Some(handle);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn IO thread");
                false
            }
        }
    }

    /// Stop the reactor and wait for both threads. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let mut io_thread = lock(&self.io_thread);
        let Some(handle) = io_thread.take() else {
            self.state.shutdown.store(true, Ordering::SeqCst);
            return;
        };

        tracing::info!("Shutting down IO");
        if !self.stop_execution() {
            tracing::debug!("No live reactor to stop");
        }
        if handle.join().is_err() {
            tracing::error!("IO thread panicked");
        }
        tracing::info!("IO shut down");
    }

    /// Ask the live reactor to stop without waiting. Returns `true` if one was running.
    pub fn stop_execution(&self) -> bool {
        self.state.stop_execution()
    }

    /// True while the I/O thread of the current run is alive.
    pub fn is_running(&self) -> bool {
        lock(&self.io_thread)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Address bound by the current run, once the listener is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.state.local_addr)
    }

    /// Handle of the live reactor; `None` between runs or once a stop took it.
    pub fn reactor_handle(&self) -> Option<ReactorHandle> {
        lock(&self.state.reactor).clone()
    }
}

impl Drop for ExternalPort {
    fn drop(&mut self) {
        self.shutdown();
    }
}
