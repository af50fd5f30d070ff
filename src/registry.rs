//! Per-service state machine and the command surface used by front ends.
//!
//! A toggle moves a stable service into `Transitioning` and runs the lifecycle operation on its own
//! thread. Toggles arriving while a service is `Transitioning` are dropped, so at most one
//! operation per service is ever in flight. Different services never wait on each other.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::{EngineKind, ServiceDescriptor, load_descriptors},
    error::{ConfigError, RegistryError},
    probe::{ProcessProbe, SystemProbe},
    supervisor::ServiceSupervisor,
};

/// Direction of a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Starting,
    Stopping,
}

/// Operator-facing state of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "direction", rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Running,
    /// An operation in this direction is in flight.
    Transitioning(Direction),
    /// The last operation in this direction failed; the next toggle retries it.
    Failed(Direction),
}

impl ServiceState {
    /// Whether a toggle would be accepted.
    pub fn is_stable(&self) -> bool {
        !matches!(self, ServiceState::Transitioning(_))
    }

    /// Operation the next toggle performs, `None` while transitioning.
    pub fn next_operation(&self) -> Option<Direction> {
        match self {
            ServiceState::Stopped | ServiceState::Failed(Direction::Starting) => {
                Some(Direction::Starting)
            }
            ServiceState::Running | ServiceState::Failed(Direction::Stopping) => {
                Some(Direction::Stopping)
            }
            ServiceState::Transitioning(_) => None,
        }
    }

    /// Status label shown to the operator.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Running => "running",
            ServiceState::Transitioning(Direction::Starting) => "starting...",
            ServiceState::Transitioning(Direction::Stopping) => "stopping...",
            ServiceState::Failed(Direction::Starting) => "start failed",
            ServiceState::Failed(Direction::Stopping) => "stop failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of one service for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    #[serde(serialize_with = "serialize_kind")]
    pub kind: EngineKind,
    pub state: ServiceState,
    pub label: &'static str,
    /// Reason of the last failure, if the service is `Failed`.
    pub detail: Option<String>,
}

fn serialize_kind<S: serde::Serializer>(kind: &EngineKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.as_ref())
}

/// Event published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub service: String,
    pub state: ServiceState,
    pub detail: Option<String>,
}

/// Result of a toggle request.
#[derive(Debug)]
pub enum Toggle {
    /// The service was transitioning; nothing was done.
    Ignored,
    /// An operation was started in the background.
    Dispatched(Operation),
}

/// Handle to a dispatched lifecycle operation.
#[derive(Debug)]
pub struct Operation {
    service: String,
    direction: Direction,
    handle: JoinHandle<bool>,
}

impl Operation {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Blocks until the operation settles and reports whether it succeeded.
    pub fn wait(self) -> bool {
        self.handle.join().unwrap_or_else(|_| {
            warn!("Worker for '{}' panicked", self.service);
            false
        })
    }
}

struct Entry {
    descriptor: ServiceDescriptor,
    state: ServiceState,
    detail: Option<String>,
}

/// State shared with worker threads.
struct Shared<P: ProcessProbe> {
    supervisor: ServiceSupervisor<P>,
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<Vec<Sender<StateChange>>>,
}

impl<P: ProcessProbe> Shared<P> {
    fn publish(
        &self,
        service: &str,
        state: ServiceState,
        detail: Option<String>,
    ) -> Result<(), RegistryError> {
        let change = StateChange {
            service: service.to_string(),
            state,
            detail,
        };
        self.subscribers
            .lock()?
            .retain(|tx| tx.send(change.clone()).is_ok());
        Ok(())
    }

    fn settle(
        &self,
        service: &str,
        state: ServiceState,
        detail: Option<String>,
    ) -> Result<(), RegistryError> {
        if let Some(entry) = self.entries.lock()?.get_mut(service) {
            entry.state = state;
            entry.detail = detail.clone();
        }
        info!("Service '{service}' is now {state}");
        self.publish(service, state, detail)
    }
}

/// In-memory collection of managed services.
pub struct ServiceRegistry<P: ProcessProbe + 'static = SystemProbe> {
    shared: Arc<Shared<P>>,
    order: Vec<String>,
}

impl<P: ProcessProbe + 'static> ServiceRegistry<P> {
    /// Registers `descriptors` and reconciles each one's state with the process table.
    pub fn new(supervisor: ServiceSupervisor<P>, descriptors: Vec<ServiceDescriptor>) -> Self {
        let mut order = Vec::with_capacity(descriptors.len());
        let mut entries = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if entries.contains_key(&descriptor.name) {
                warn!("Ignoring duplicate service name '{}'", descriptor.name);
                continue;
            }
            let state = if supervisor.is_running(&descriptor) {
                ServiceState::Running
            } else {
                ServiceState::Stopped
            };
            debug!("Service '{}' reconciled as {state}", descriptor.name);
            order.push(descriptor.name.clone());
            entries.insert(
                descriptor.name.clone(),
                Entry {
                    descriptor,
                    state,
                    detail: None,
                },
            );
        }

        Self {
            shared: Arc::new(Shared {
                supervisor,
                entries: Mutex::new(entries),
                subscribers: Mutex::new(Vec::new()),
            }),
            order,
        }
    }

    /// Loads descriptors from the supervisor's install root, materializes missing native configs
    /// and registers every present service.
    pub fn load(supervisor: ServiceSupervisor<P>) -> Result<Self, ConfigError> {
        let descriptors = load_descriptors(supervisor.root())?;
        for descriptor in &descriptors {
            if let Err(err) = supervisor.materializer().ensure(descriptor) {
                warn!("Failed to generate config for '{}': {err}", descriptor.name);
            }
        }
        Ok(Self::new(supervisor, descriptors))
    }

    pub fn supervisor(&self) -> &ServiceSupervisor<P> {
        &self.shared.supervisor
    }

    /// Registered service names in registration order.
    pub fn service_names(&self) -> &[String] {
        &self.order
    }

    /// Descriptor of a registered service.
    pub fn descriptor(&self, name: &str) -> Result<ServiceDescriptor, RegistryError> {
        let entries = self.shared.entries.lock()?;
        entries
            .get(name)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| RegistryError::UnknownService(name.to_string()))
    }

    /// Receives every subsequent state change.
    pub fn subscribe(&self) -> Result<Receiver<StateChange>, RegistryError> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock()?.push(tx);
        Ok(rx)
    }

    /// Current state of a service.
    pub fn query_state(&self, name: &str) -> Result<ServiceState, RegistryError> {
        Ok(self.status(name)?.state)
    }

    /// Current state and failure detail of a service.
    pub fn status(&self, name: &str) -> Result<ServiceStatus, RegistryError> {
        let entries = self.shared.entries.lock()?;
        let entry = entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownService(name.to_string()))?;
        Ok(ServiceStatus {
            name: name.to_string(),
            kind: entry.descriptor.kind,
            state: entry.state,
            label: entry.state.label(),
            detail: entry.detail.clone(),
        })
    }

    /// Status of every service in registration order.
    pub fn statuses(&self) -> Result<Vec<ServiceStatus>, RegistryError> {
        self.order.iter().map(|name| self.status(name)).collect()
    }

    /// Starts a stopped service or stops a running one in the background.
    ///
    /// A `Failed` service retries the operation that failed. A service already `Transitioning`
    /// is left alone and [`Toggle::Ignored`] is returned.
    pub fn toggle(&self, name: &str) -> Result<Toggle, RegistryError> {
        let (previous, direction, descriptor) = {
            let mut entries = self.shared.entries.lock()?;
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| RegistryError::UnknownService(name.to_string()))?;
            let Some(direction) = entry.state.next_operation() else {
                debug!("Ignoring toggle for '{name}' while {}", entry.state);
                return Ok(Toggle::Ignored);
            };
            let previous = entry.state;
            entry.state = ServiceState::Transitioning(direction);
            entry.detail = None;
            (previous, direction, entry.descriptor.clone())
        };
        self.shared
            .publish(name, ServiceState::Transitioning(direction), None)?;

        let shared = Arc::clone(&self.shared);
        let service = name.to_string();
        let spawned = thread::Builder::new()
            .name(format!("dbv-{}", descriptor.kind))
            .spawn(move || {
                let result = match direction {
                    Direction::Starting => shared.supervisor.start_checked(&descriptor),
                    Direction::Stopping => shared.supervisor.stop_checked(&descriptor),
                };
                let succeeded = result.is_ok();
                let (state, detail) = match (direction, result) {
                    (Direction::Starting, Ok(())) => (ServiceState::Running, None),
                    (Direction::Stopping, Ok(())) => (ServiceState::Stopped, None),
                    (direction, Err(err)) => {
                        (ServiceState::Failed(direction), Some(err.to_string()))
                    }
                };
                if let Err(err) = shared.settle(&service, state, detail) {
                    warn!("Failed to record outcome for '{service}': {err}");
                    return false;
                }
                succeeded
            });

        match spawned {
            Ok(handle) => Ok(Toggle::Dispatched(Operation {
                service: name.to_string(),
                direction,
                handle,
            })),
            Err(source) => {
                self.shared.settle(name, previous, None)?;
                Err(RegistryError::Worker {
                    service: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Sends a stop to every `Running` service, then waits the configured shutdown delay.
    ///
    /// Best-effort: stops still in flight after the delay are not awaited, but their handles are
    /// returned for callers that want to.
    pub fn shutdown_all(&self) -> Vec<Operation> {
        let running: Vec<String> = self
            .order
            .iter()
            .filter(|name| matches!(self.query_state(name), Ok(ServiceState::Running)))
            .cloned()
            .collect();

        let mut operations = Vec::new();
        for name in running {
            match self.toggle(&name) {
                Ok(Toggle::Dispatched(operation)) => operations.push(operation),
                Ok(Toggle::Ignored) => {}
                Err(err) => warn!("Failed to stop '{name}' during shutdown: {err}"),
            }
        }

        if !operations.is_empty() {
            let delay = self.supervisor().settings().shutdown_delay;
            info!("Waiting {delay:?} for {} stop(s)", operations.len());
            thread::sleep(delay);
        }
        operations
    }
}
