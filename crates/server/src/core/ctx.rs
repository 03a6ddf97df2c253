use crate::core::error::{Error, Result};
use axum::{extract::FromRequestParts, http::request::Parts};

/// Authenticated caller, placed in request extensions by `mw_require_auth`.
#[derive(Clone, Debug)]
pub struct Ctx {
    user_id: String,
    token: String,
}

impl Ctx {
    pub fn new(user_id: String, token: String) -> Self {
        Self { user_id, token }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Session token the request was authenticated with.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Ctx>()
            .cloned()
            .ok_or(Error::AuthFailCtxNotInRequestExt)
    }
}
