//! Account flows: registration, sign-in and sign-out on top of the session provider and
//! the profile store.

use crate::{
    access::RoleResolver,
    error::{AppError, AuthError},
    models::{ProfileUpsert, Role, SignInResponse, SignUpRequest, UserProfile},
    repository::Repository,
    session::{Session, SessionProvider},
};

pub const NOT_ADMIN_MESSAGE: &str = "You do not have admin privileges to access this area.";
const PROFILE_FAILED_MESSAGE: &str = "Failed to create user profile. Please try again.";

/// Result of a sign-in attempt. `session` is present only on success and is what the
/// HTTP layer turns into cookies.
#[derive(Debug)]
pub struct SignInOutcome {
    pub response: SignInResponse,
    pub session: Option<Session>,
}

impl SignInOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            response: SignInResponse {
                success: false,
                is_admin: false,
                error: Some(message.into()),
            },
            session: None,
        }
    }
}

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// sign_up_user
///
/// Creates the identity, then its profile. The two writes go to different systems, so
/// this runs as a small saga: when the profile write fails the fresh identity is deleted
/// again, leaving the e-mail free for a retry. The caller always sees the profile failure,
/// even if the compensating delete also fails.
pub async fn sign_up_user(
    provider: &dyn SessionProvider,
    profiles: &dyn Repository,
    req: SignUpRequest,
    role: Role,
) -> Result<UserProfile, AppError> {
    require(&req.email, "email")?;
    require(&req.password, "password")?;

    let email = req.email.trim().to_string();
    let user = provider
        .sign_up(&email, &req.password)
        .await
        .map_err(|e| match e {
            AuthError::Rejected(message) => AppError::Registration(message),
            other => AppError::Auth(other),
        })?;

    let upsert = ProfileUpsert {
        user_id: user.id,
        email: user.email.clone(),
        first_name: req.first_name,
        last_name: req.last_name,
        phone: req.phone.filter(|p| !p.trim().is_empty()),
        role,
    };

    match profiles.upsert_profile(upsert).await {
        Ok(profile) => {
            tracing::info!(user_id = %user.id, %role, "account registered");
            Ok(profile)
        }
        Err(e) => {
            tracing::error!(user_id = %user.id, error = %e, "profile write failed, rolling back identity");
            if let Err(undo) = provider.delete_user(user.id).await {
                tracing::error!(
                    user_id = %user.id,
                    error = %undo,
                    "compensating identity delete failed, identity left without profile"
                );
            }
            Err(AppError::Registration(PROFILE_FAILED_MESSAGE.to_string()))
        }
    }
}

/// sign_in_user
///
/// Credential problems come back as an unsuccessful outcome rather than an error, so the
/// form can show the provider's message. Only an unreachable provider is an `Err`.
pub async fn sign_in_user(
    provider: &dyn SessionProvider,
    resolver: &RoleResolver,
    email: &str,
    password: &str,
) -> Result<SignInOutcome, AppError> {
    if email.trim().is_empty() || password.is_empty() {
        return Ok(SignInOutcome::failed("Email and password are required"));
    }

    let session = match provider.sign_in(email.trim(), password).await {
        Ok(session) => session,
        Err(AuthError::Rejected(message)) => return Ok(SignInOutcome::failed(message)),
        Err(e) => return Err(e.into()),
    };

    let is_admin = resolver.is_admin_user(session.user.id).await;
    Ok(SignInOutcome {
        response: SignInResponse {
            success: true,
            is_admin,
            error: None,
        },
        session: Some(session),
    })
}

/// admin_sign_in
///
/// Back-office login. A valid non-admin account is signed straight back out so it never
/// holds a session obtained through the admin form.
pub async fn admin_sign_in(
    provider: &dyn SessionProvider,
    resolver: &RoleResolver,
    email: &str,
    password: &str,
) -> Result<SignInOutcome, AppError> {
    let outcome = sign_in_user(provider, resolver, email, password).await?;

    match &outcome.session {
        Some(session) if !outcome.response.is_admin => {
            tracing::warn!(user_id = %session.user.id, "non-admin attempted admin login");
            sign_out_user(provider, Some(&session.access_token)).await;
            Ok(SignInOutcome::failed(NOT_ADMIN_MESSAGE))
        }
        _ => Ok(outcome),
    }
}

/// Revokes the provider session if there is one. Failures are logged only: the caller
/// clears the client's cookies regardless.
pub async fn sign_out_user(provider: &dyn SessionProvider, access_token: Option<&str>) {
    let Some(token) = access_token else { return };
    if let Err(e) = provider.sign_out(token).await {
        tracing::warn!(error = %e, "provider sign-out failed");
    }
}
