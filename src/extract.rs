use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use crate::auth::{self, Principal};
use crate::error::ApiError;
use crate::models::Role;
use crate::AppState;

/// Authenticated caller, extracted from the `Authorization: Bearer` header.
/// Missing or unverifiable tokens reject with 401, which is the signal the
/// client uses to attempt a silent refresh.
pub struct AuthUser(pub Principal);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthorized("No token provided"))?;
        let principal = auth::verify_access_token(&state.auth, bearer.token())
            .map_err(|_| ApiError::unauthorized("Invalid token"))?;
        Ok(AuthUser(principal))
    }
}

/// Authenticated caller holding the admin role. The role comes from the
/// verified access token, so this check is pure computation; a mismatch is
/// 403, never 401, so clients don't try to refresh their way past it.
pub struct AdminUser(pub Principal);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let AuthUser(principal) = AuthUser::from_request_parts(parts, state).await?;
        if principal.role != Role::Admin {
            return Err(ApiError::forbidden("Forbidden: Admins only"));
        }
        Ok(AdminUser(principal))
    }
}
