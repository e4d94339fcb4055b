//! Request authentication.
//!
//! The token is taken from `Authorization: Bearer`, then the `__session`
//! cookie, then a `token` query parameter (browsers cannot set headers on
//! WebSocket upgrades).

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use whisperer_core::AuthUser;

const SESSION_COOKIE: &str = "__session";

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

fn cookie_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
}

pub fn request_token(parts: &Parts) -> Option<String> {
    bearer_token(parts)
        .or_else(|| cookie_token(parts))
        .or_else(|| query_token(parts))
        .filter(|t| !t.is_empty())
}

/// The caller, if they presented a known token.
pub struct MaybeUser(pub Option<AuthUser>);

impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = request_token(parts) else {
            return Ok(MaybeUser(None));
        };
        let user = state.identity.authenticate(&token).await;
        if user.is_none() {
            tracing::debug!("request presented an unknown token");
        }
        Ok(MaybeUser(user))
    }
}

/// The caller; rejects the request with 401 when there is none.
pub struct CurrentUser(pub AuthUser);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match MaybeUser::from_request_parts(parts, state).await {
            Ok(MaybeUser(Some(user))) => Ok(CurrentUser(user)),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_of(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn bearer_header_wins() {
        let parts = parts_of(
            Request::builder()
                .uri("/ws?token=from-query")
                .header(AUTHORIZATION, "Bearer from-header")
                .header(COOKIE, "__session=from-cookie")
                .body(())
                .unwrap(),
        );
        assert_eq!(request_token(&parts).as_deref(), Some("from-header"));
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let parts = parts_of(
            Request::builder()
                .uri("/api/conversations")
                .header(COOKIE, "theme=dark; __session=abc.def; other=1")
                .body(())
                .unwrap(),
        );
        assert_eq!(request_token(&parts).as_deref(), Some("abc.def"));
    }

    #[test]
    fn query_token_is_the_last_resort() {
        let parts = parts_of(Request::builder().uri("/ws?token=dev").body(()).unwrap());
        assert_eq!(request_token(&parts).as_deref(), Some("dev"));

        let none = parts_of(Request::builder().uri("/ws").body(()).unwrap());
        assert_eq!(request_token(&none), None);
    }
}
