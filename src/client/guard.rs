use std::sync::{Arc, Mutex};

use tokio::{sync::watch, task::JoinHandle};

use super::{AuthContext, AuthPhase, AuthSnapshot};
use crate::edge::{LOGIN_PATH, UNAUTHORIZED_REDIRECT};

/// Where a denied guard sends the user. Implemented by the host (router, test recorder).
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    NotAdmin,
}

impl DenyReason {
    pub fn redirect_path(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => LOGIN_PATH,
            DenyReason::NotAdmin => UNAUTHORIZED_REDIRECT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Checking,
    Allowed,
    Denied(DenyReason),
}

impl GuardState {
    fn from_snapshot(snapshot: &AuthSnapshot) -> Self {
        match &snapshot.phase {
            AuthPhase::Resolving => GuardState::Checking,
            AuthPhase::Resolved { user: None, .. } => {
                GuardState::Denied(DenyReason::Unauthenticated)
            }
            AuthPhase::Resolved { is_admin: false, .. } => GuardState::Denied(DenyReason::NotAdmin),
            AuthPhase::Resolved { is_admin: true, .. } => GuardState::Allowed,
        }
    }
}

/// What a guarded view shows for the current state.
#[derive(Debug, PartialEq, Eq)]
pub enum GuardView<T> {
    /// Still checking: a loading placeholder, never the protected content.
    Placeholder,
    Content(T),
    /// Denied: nothing, a navigation is under way.
    Redirecting,
}

/// ClientGuard
///
/// Gate around admin-only client content. Mounting starts in `Checking` and follows the
/// `AuthContext` snapshot: an admin verdict allows rendering, anything else navigates away.
/// Every session change re-enters `Checking` before the next verdict.
///
/// Dropping the guard stops it and releases its snapshot subscription; a resolution that
/// completes after that is never acted upon.
pub struct ClientGuard {
    state: watch::Receiver<GuardState>,
    transitions: Arc<Mutex<Vec<GuardState>>>,
    task: JoinHandle<()>,
}

struct Recorder {
    current: GuardState,
    tx: watch::Sender<GuardState>,
    transitions: Arc<Mutex<Vec<GuardState>>>,
    navigator: Arc<dyn Navigator>,
}

impl Recorder {
    fn enter(&mut self, next: GuardState) {
        if next == self.current {
            return;
        }
        self.current = next;
        if let Ok(mut log) = self.transitions.lock() {
            log.push(next);
        }
        self.tx.send_replace(next);

        if let GuardState::Denied(reason) = next {
            tracing::info!(?reason, "client guard denied access");
            self.navigator.navigate(reason.redirect_path());
        }
    }
}

impl ClientGuard {
    pub fn mount(ctx: &AuthContext, navigator: Arc<dyn Navigator>) -> Self {
        let mut snapshots = ctx.subscribe();
        let (tx, state) = watch::channel(GuardState::Checking);
        let transitions = Arc::new(Mutex::new(vec![GuardState::Checking]));

        let mut recorder = Recorder {
            current: GuardState::Checking,
            tx,
            transitions: transitions.clone(),
            navigator,
        };

        let task = tokio::spawn(async move {
            let mut seen_generation: Option<u64> = None;
            loop {
                let snapshot = snapshots.borrow_and_update().clone();
                let next = GuardState::from_snapshot(&snapshot);

                // A new generation always passes through Checking, even when the
                // intermediate Resolving snapshot was overwritten before we saw it.
                let new_generation = seen_generation.is_some_and(|g| g != snapshot.generation);
                if new_generation && next != GuardState::Checking {
                    recorder.enter(GuardState::Checking);
                }
                seen_generation = Some(snapshot.generation);
                recorder.enter(next);

                if snapshots.changed().await.is_err() {
                    break;
                }
            }
        });

        Self {
            state,
            transitions,
            task,
        }
    }

    pub fn state(&self) -> GuardState {
        *self.state.borrow()
    }

    /// Waits until the guard leaves `Checking`.
    pub async fn verdict(&self) -> GuardState {
        self.wait_for(|s| s != GuardState::Checking).await
    }

    /// Waits until the guard's state satisfies `pred`. Returns the current state if the
    /// guard stopped first.
    pub async fn wait_for(&self, mut pred: impl FnMut(GuardState) -> bool) -> GuardState {
        let mut rx = self.state.clone();
        match rx.wait_for(|s| pred(*s)).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Renders `content` only when access has been granted.
    pub fn render<T>(&self, content: impl FnOnce() -> T) -> GuardView<T> {
        match self.state() {
            GuardState::Checking => GuardView::Placeholder,
            GuardState::Allowed => GuardView::Content(content()),
            GuardState::Denied(_) => GuardView::Redirecting,
        }
    }

    /// Every state the guard has been in, starting with `Checking`.
    pub fn transitions(&self) -> Vec<GuardState> {
        self.transitions
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
