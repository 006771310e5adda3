//! Client-side authentication state.
//!
//! A client process (one browser tab, one CLI session...) owns exactly one `AuthContext`.
//! The context holds the only subscription to the provider's session-change stream and
//! republishes a derived snapshot; guards observe that snapshot instead of subscribing
//! themselves.

pub mod guard;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
};

use crate::{
    access::{RoleResolver, SessionSource},
    error::AuthError,
    session::{AuthUser, Session, SessionProviderState, restore_session},
};

pub use guard::{ClientGuard, DenyReason, GuardState, GuardView, Navigator};

/// ClientSession
///
/// The session object held by the client, equivalent to the token pair a browser keeps
/// in storage.
pub struct ClientSession {
    provider: SessionProviderState,
    current: RwLock<Option<Session>>,
}

impl ClientSession {
    pub fn new(provider: SessionProviderState) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
        }
    }

    pub fn provider(&self) -> &SessionProviderState {
        &self.provider
    }

    /// Holds the local write lock across the provider call, so an observer woken by the
    /// sign-in notification can only read the session after it has been stored.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let mut current = self.current.write().await;
        let session = self.provider.sign_in(email, password).await?;
        let user = session.user.clone();
        *current = Some(session);
        Ok(user)
    }

    /// Drops the local session first, then tells the provider. The local state is gone
    /// even if the provider call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.current.write().await.take() else {
            return Ok(());
        };
        self.provider.sign_out(&session.access_token).await
    }

    /// Adopts a session obtained elsewhere (e.g. handed over by the server after login).
    pub async fn set_session(&self, session: Option<Session>) {
        *self.current.write().await = session;
    }

    pub async fn has_session(&self) -> bool {
        self.current.read().await.is_some()
    }
}

#[async_trait]
impl SessionSource for ClientSession {
    async fn current_user(&self) -> Option<AuthUser> {
        let (access, refresh) = {
            let current = self.current.read().await;
            let session = current.as_ref()?;
            (session.access_token.clone(), session.refresh_token.clone())
        };

        match restore_session(self.provider.as_ref(), Some(&access), Some(&refresh)).await {
            Ok(Some(restored)) => {
                if let Some(fresh) = restored.refreshed {
                    *self.current.write().await = Some(fresh);
                }
                Some(restored.user)
            }
            Ok(None) => {
                tracing::debug!("client session no longer valid, discarding");
                self.current.write().await.take();
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "session provider failed during client check");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    /// A session change was observed and the role is being re-resolved.
    Resolving,
    /// `user` is `None` when nobody is signed in.
    Resolved {
        user: Option<AuthUser>,
        is_admin: bool,
    },
}

/// AuthSnapshot
///
/// Read-only view published by `AuthContext`. `generation` increases with every session
/// change notification, so observers can tell a fresh resolution from a stale one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub generation: u64,
    pub phase: AuthPhase,
}

/// AuthContext
///
/// Owns the client's single session-change subscription. On start and after every
/// notification it re-runs the role resolution and publishes the result.
pub struct AuthContext {
    session: Arc<ClientSession>,
    snapshots: Arc<watch::Sender<AuthSnapshot>>,
    task: JoinHandle<()>,
}

impl AuthContext {
    pub fn start(session: Arc<ClientSession>, resolver: Arc<RoleResolver>) -> Self {
        let mut subscription = session.provider().on_session_change();
        let (tx, _) = watch::channel(AuthSnapshot {
            generation: 0,
            phase: AuthPhase::Resolving,
        });
        let snapshots = Arc::new(tx);

        let task = {
            let session = session.clone();
            let snapshots = snapshots.clone();
            tokio::spawn(async move {
                let mut generation = 0;
                loop {
                    let actor = resolver.resolve(session.as_ref()).await;
                    let phase = match actor {
                        Some(actor) => AuthPhase::Resolved {
                            is_admin: actor.is_admin,
                            user: Some(actor.user),
                        },
                        None => AuthPhase::Resolved {
                            user: None,
                            is_admin: false,
                        },
                    };
                    snapshots.send_replace(AuthSnapshot { generation, phase });

                    let Some(event) = subscription.recv().await else {
                        tracing::debug!("session provider closed, auth context stopping");
                        break;
                    };
                    generation += 1;
                    tracing::debug!(generation, ?event, "session change observed");
                    snapshots.send_replace(AuthSnapshot {
                        generation,
                        phase: AuthPhase::Resolving,
                    });
                }
            })
        };

        Self {
            session,
            snapshots,
            task,
        }
    }

    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshots.subscribe()
    }

    /// Number of live observers (mounted guards).
    pub fn observer_count(&self) -> usize {
        self.snapshots.receiver_count()
    }

    /// Waits for the first resolution that started at or after `generation`.
    pub async fn settled(&self, generation: u64) -> AuthSnapshot {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(|s| s.generation >= generation && s.phase != AuthPhase::Resolving)
            .await
            .map(|s| s.clone());
        snapshot.unwrap_or_else(|_| self.snapshot())
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.task.abort();
    }
}
