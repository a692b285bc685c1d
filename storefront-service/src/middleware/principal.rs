//! Caller identity extracted from trusted headers.
//!
//! The fronting gateway authenticates the session and forwards the result as
//! `X-User-ID`, `X-User-Email` and `X-User-Role`. This service does not issue
//! or check credentials itself.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

use crate::models::Principal;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_EMAIL_HEADER: &str = "X-User-Email";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

const ADMIN_ROLE: &str = "admin";

/// Any authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

/// A caller holding the administrator capability.
#[derive(Debug, Clone)]
pub struct AdminPrincipal(pub Principal);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER).ok_or_else(|| {
            AppError::AuthError(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
        })?;

        let is_admin = header(parts, USER_ROLE_HEADER)
            .map(|role| role.eq_ignore_ascii_case(ADMIN_ROLE))
            .unwrap_or(false);

        tracing::Span::current().record("user_id", user_id);

        Ok(CurrentPrincipal(Principal {
            user_id: user_id.to_string(),
            email: header(parts, USER_EMAIL_HEADER).map(str::to_string),
            is_admin,
        }))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentPrincipal(principal) = CurrentPrincipal::from_request_parts(parts, state).await?;
        if !principal.is_admin {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Administrator access required"
            )));
        }
        Ok(AdminPrincipal(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(builder: axum::http::request::Builder) -> Result<CurrentPrincipal, AppError> {
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CurrentPrincipal::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_user_is_unauthorized() {
        let err = extract(Request::builder()).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_role_is_case_insensitive() {
        let principal = extract(
            Request::builder()
                .header(USER_ID_HEADER, "u1")
                .header(USER_ROLE_HEADER, "Admin"),
        )
        .await
        .unwrap();
        assert!(principal.0.is_admin);
        assert_eq!(principal.0.user_id, "u1");
        assert_eq!(principal.0.email, None);
    }

    #[tokio::test]
    async fn non_admin_is_forbidden_from_admin_routes() {
        let (mut parts, _) = Request::builder()
            .header(USER_ID_HEADER, "u1")
            .body(())
            .unwrap()
            .into_parts();
        let err = AdminPrincipal::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
    }
}
