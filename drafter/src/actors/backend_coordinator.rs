//! BackendCoordinatorActor - owns the priority-ordered backend list
//!
//! Holds every configured generation backend in descending priority order and
//! tracks the process-wide current backend. Availability is probed on every
//! query; nothing about a probe result is cached beyond the choice of current
//! backend.
//!
//! # Example
//!
//! ```rust,ignore
//! let (coordinator, _handle) = Actor::spawn(
//!     None,
//!     BackendCoordinatorActor,
//!     BackendCoordinatorArguments::new(backends),
//! ).await?;
//!
//! let switched = switch_backend(&coordinator, "openai").await?;
//! let active = active_backend(&coordinator).await?;
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::BackendDescriptor;

use crate::backends::GenerationBackend;

#[derive(Debug, Default)]
pub struct BackendCoordinatorActor;

pub struct BackendCoordinatorArguments {
    pub backends: Vec<Arc<dyn GenerationBackend>>,
    /// Preferred initial backend, used when its probe succeeds at startup.
    pub default_backend: Option<String>,
}

impl BackendCoordinatorArguments {
    pub fn new(backends: Vec<Arc<dyn GenerationBackend>>) -> Self {
        Self {
            backends,
            default_backend: None,
        }
    }

    pub fn with_default(mut self, name: Option<String>) -> Self {
        self.default_backend = name;
        self
    }
}

pub struct BackendCoordinatorState {
    backends: Vec<Arc<dyn GenerationBackend>>,
    current: Option<usize>,
}

/// Shared reference to a backend, handed out to generation attempts.
#[derive(Clone)]
pub struct BackendHandle(Arc<dyn GenerationBackend>);

impl BackendHandle {
    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn backend(&self) -> &dyn GenerationBackend {
        self.0.as_ref()
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BackendHandle").field(&self.0.name()).finish()
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error("backend {0} is not available")]
    Unavailable(String),
    #[error("no generation backend is available")]
    NoneAvailable,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub enum CoordinatorMsg {
    /// Every backend with a fresh probe
    ListBackends {
        reply: RpcReplyPort<Vec<BackendDescriptor>>,
    },
    /// Current backend, falling back to the best available one
    ActiveBackend {
        reply: RpcReplyPort<Option<BackendHandle>>,
    },
    /// Make `name` current if it exists and probes available
    SwitchTo {
        name: String,
        reply: RpcReplyPort<bool>,
    },
    /// Backend for one generation attempt: the override when given, else the active one
    Resolve {
        preferred: Option<String>,
        reply: RpcReplyPort<Result<BackendHandle, CoordinatorError>>,
    },
}

impl BackendCoordinatorState {
    fn new(mut backends: Vec<Arc<dyn GenerationBackend>>, default_backend: Option<&str>) -> Self {
        // Stable sort keeps catalog order for equal priorities.
        backends.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        let mut state = Self {
            backends,
            current: None,
        };
        state.current = default_backend
            .and_then(|name| state.position(name))
            .filter(|&idx| state.backends[idx].probe())
            .or_else(|| state.first_available());
        state
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.backends.iter().position(|b| b.name() == name)
    }

    fn first_available(&self) -> Option<usize> {
        self.backends.iter().position(|b| b.probe())
    }

    fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends
            .iter()
            .enumerate()
            .map(|(idx, backend)| BackendDescriptor {
                name: backend.name().to_string(),
                priority: backend.priority(),
                available: backend.probe(),
                capabilities: backend.capabilities(),
                is_current: self.current == Some(idx),
            })
            .collect()
    }

    fn active(&mut self) -> Option<BackendHandle> {
        if let Some(idx) = self.current {
            if self.backends[idx].probe() {
                return Some(BackendHandle(Arc::clone(&self.backends[idx])));
            }
        }

        let fallback = self.first_available();
        if fallback != self.current {
            tracing::warn!(
                previous = ?self.current.map(|idx| self.backends[idx].name()),
                next = ?fallback.map(|idx| self.backends[idx].name()),
                "Current backend unavailable; falling back"
            );
            self.current = fallback;
        }
        fallback.map(|idx| BackendHandle(Arc::clone(&self.backends[idx])))
    }

    fn switch_to(&mut self, name: &str) -> bool {
        let Some(idx) = self.position(name) else {
            tracing::warn!(backend = %name, "Switch rejected: unknown backend");
            return false;
        };
        if !self.backends[idx].probe() {
            tracing::warn!(backend = %name, "Switch rejected: backend unavailable");
            return false;
        }
        self.current = Some(idx);
        tracing::info!(backend = %name, "Switched current backend");
        true
    }

    fn resolve(&mut self, preferred: Option<&str>) -> Result<BackendHandle, CoordinatorError> {
        match preferred {
            Some(name) => {
                let idx = self
                    .position(name)
                    .ok_or_else(|| CoordinatorError::UnknownBackend(name.to_string()))?;
                if !self.backends[idx].probe() {
                    return Err(CoordinatorError::Unavailable(name.to_string()));
                }
                Ok(BackendHandle(Arc::clone(&self.backends[idx])))
            }
            None => self.active().ok_or(CoordinatorError::NoneAvailable),
        }
    }
}

#[async_trait]
impl Actor for BackendCoordinatorActor {
    type Msg = CoordinatorMsg;
    type State = BackendCoordinatorState;
    type Arguments = BackendCoordinatorArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let state = BackendCoordinatorState::new(args.backends, args.default_backend.as_deref());
        tracing::info!(
            actor_id = %myself.get_id(),
            backends = state.backends.len(),
            current = ?state.current.map(|idx| state.backends[idx].name()),
            "BackendCoordinatorActor starting"
        );
        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMsg::ListBackends { reply } => {
                let _ = reply.send(state.descriptors());
            }
            CoordinatorMsg::ActiveBackend { reply } => {
                let _ = reply.send(state.active());
            }
            CoordinatorMsg::SwitchTo { name, reply } => {
                let _ = reply.send(state.switch_to(&name));
            }
            CoordinatorMsg::Resolve { preferred, reply } => {
                let _ = reply.send(state.resolve(preferred.as_deref()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

pub async fn list_backends(
    coordinator: &ActorRef<CoordinatorMsg>,
) -> Result<Vec<BackendDescriptor>, ractor::RactorErr<CoordinatorMsg>> {
    ractor::call!(coordinator, |reply| CoordinatorMsg::ListBackends { reply })
}

pub async fn active_backend(
    coordinator: &ActorRef<CoordinatorMsg>,
) -> Result<Option<BackendHandle>, ractor::RactorErr<CoordinatorMsg>> {
    ractor::call!(coordinator, |reply| CoordinatorMsg::ActiveBackend { reply })
}

pub async fn switch_backend(
    coordinator: &ActorRef<CoordinatorMsg>,
    name: impl Into<String>,
) -> Result<bool, ractor::RactorErr<CoordinatorMsg>> {
    let name = name.into();
    ractor::call!(coordinator, |reply| CoordinatorMsg::SwitchTo { name, reply })
}

pub async fn resolve_backend(
    coordinator: &ActorRef<CoordinatorMsg>,
    preferred: Option<String>,
) -> Result<Result<BackendHandle, CoordinatorError>, ractor::RactorErr<CoordinatorMsg>> {
    ractor::call!(coordinator, |reply| CoordinatorMsg::Resolve { preferred, reply })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendError, GenerationSink};
    use shared_types::{Document, GenerationRequest};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Probed {
        name: &'static str,
        priority: i32,
        up: Arc<AtomicBool>,
    }

    #[async_trait]
    impl GenerationBackend for Probed {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn probe(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
            _sink: &dyn GenerationSink,
        ) -> Result<Document, BackendError> {
            Ok(Document::new(request.title.clone(), Vec::new(), self.name))
        }
    }

    fn backend(name: &'static str, priority: i32, up: bool) -> (Arc<dyn GenerationBackend>, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(up));
        (
            Arc::new(Probed {
                name,
                priority,
                up: flag.clone(),
            }),
            flag,
        )
    }

    async fn spawn(
        backends: Vec<Arc<dyn GenerationBackend>>,
        default_backend: Option<&str>,
    ) -> ActorRef<CoordinatorMsg> {
        let (coordinator, _handle) = Actor::spawn(
            None,
            BackendCoordinatorActor,
            BackendCoordinatorArguments::new(backends)
                .with_default(default_backend.map(str::to_string)),
        )
        .await
        .unwrap();
        coordinator
    }

    #[tokio::test]
    async fn test_list_is_priority_ordered_with_current_marker() {
        let (low, _) = backend("template", 0, true);
        let (high, _) = backend("anthropic", 100, false);
        let (mid, _) = backend("openai", 50, true);
        let coordinator = spawn(vec![low, high, mid], None).await;

        let listed = list_backends(&coordinator).await.unwrap();
        let names: Vec<&str> = listed.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["anthropic", "openai", "template"]);
        assert!(!listed[0].available);
        assert!(listed[1].is_current);
        assert_eq!(listed.iter().filter(|d| d.is_current).count(), 1);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_backend_leaves_current() {
        let (a, _) = backend("anthropic", 100, true);
        let (t, _) = backend("template", 0, true);
        let coordinator = spawn(vec![a, t], None).await;

        assert!(!switch_backend(&coordinator, "nonexistent").await.unwrap());
        let active = active_backend(&coordinator).await.unwrap().unwrap();
        assert_eq!(active.name(), "anthropic");
    }

    #[tokio::test]
    async fn test_switch_requires_available_probe() {
        let (a, _) = backend("anthropic", 100, true);
        let (o, openai_up) = backend("openai", 50, false);
        let coordinator = spawn(vec![a, o], None).await;

        assert!(!switch_backend(&coordinator, "openai").await.unwrap());
        openai_up.store(true, Ordering::SeqCst);
        assert!(switch_backend(&coordinator, "openai").await.unwrap());
        let active = active_backend(&coordinator).await.unwrap().unwrap();
        assert_eq!(active.name(), "openai");
    }

    #[tokio::test]
    async fn test_active_falls_back_when_current_goes_down() {
        let (a, anthropic_up) = backend("anthropic", 100, true);
        let (t, _) = backend("template", 0, true);
        let coordinator = spawn(vec![a, t], None).await;

        anthropic_up.store(false, Ordering::SeqCst);
        let active = active_backend(&coordinator).await.unwrap().unwrap();
        assert_eq!(active.name(), "template");

        // Recovery does not switch back on its own.
        anthropic_up.store(true, Ordering::SeqCst);
        let active = active_backend(&coordinator).await.unwrap().unwrap();
        assert_eq!(active.name(), "template");
    }

    #[tokio::test]
    async fn test_default_backend_honoured_when_available() {
        let (a, _) = backend("anthropic", 100, true);
        let (t, _) = backend("template", 0, true);
        let coordinator = spawn(vec![a, t], Some("template")).await;
        let active = active_backend(&coordinator).await.unwrap().unwrap();
        assert_eq!(active.name(), "template");
    }

    #[tokio::test]
    async fn test_resolve_override() {
        let (a, _) = backend("anthropic", 100, false);
        let (t, _) = backend("template", 0, true);
        let coordinator = spawn(vec![a, t], None).await;

        assert_eq!(
            resolve_backend(&coordinator, Some("missing".to_string()))
                .await
                .unwrap()
                .unwrap_err(),
            CoordinatorError::UnknownBackend("missing".to_string())
        );
        assert_eq!(
            resolve_backend(&coordinator, Some("anthropic".to_string()))
                .await
                .unwrap()
                .unwrap_err(),
            CoordinatorError::Unavailable("anthropic".to_string())
        );
        let resolved = resolve_backend(&coordinator, None).await.unwrap().unwrap();
        assert_eq!(resolved.name(), "template");
    }

    #[tokio::test]
    async fn test_nothing_available() {
        let (a, _) = backend("anthropic", 100, false);
        let coordinator = spawn(vec![a], None).await;
        assert!(active_backend(&coordinator).await.unwrap().is_none());
        assert_eq!(
            resolve_backend(&coordinator, None).await.unwrap().unwrap_err(),
            CoordinatorError::NoneAvailable
        );
    }
}
