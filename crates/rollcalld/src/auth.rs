use crate::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use rollcall_core::Role;

pub const USER_TYPE_HEADER: &str = "x-user-type";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Who is calling, as declared by the `X-User-Type` and `X-User-Email`
/// headers. Both are optional.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub role: Option<Role>,
    pub email: Option<String>,
}

impl Caller {
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.role == Some(role) {
            Ok(())
        } else {
            tracing::warn!(required = %role, caller = ?self.role, email = ?self.email, "access denied");
            Err(ApiError::Forbidden(format!("Access denied. Only {role}s can perform this action.")))
        }
    }
}

fn header(parts: &Parts, name: &str) -> Result<Option<String>, ApiError> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .to_str()
            .map(|s| Some(s.trim().to_string()).filter(|s| !s.is_empty()))
            .map_err(|_| ApiError::BadRequest(format!("invalid {name} header"))),
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = header(parts, USER_TYPE_HEADER)?
            .map(|raw| raw.parse::<Role>().map_err(ApiError::BadRequest))
            .transpose()?;
        let email = header(parts, USER_EMAIL_HEADER)?;
        Ok(Caller { role, email })
    }
}
