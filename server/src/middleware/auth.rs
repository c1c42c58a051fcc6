use std::fmt;

use crate::{
    auth_token::{SessionClaims, TokenCodec, TokenError},
    routing::Role,
    session::{self, SessionError},
};

/// Why a protected request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingSession,
    MalformedSession,
    InvalidSignature,
    Expired,
    RoleMismatch,
}

impl AuthFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::MissingSession => "no active session",
            AuthFailure::MalformedSession => "malformed session",
            AuthFailure::InvalidSignature => "invalid session signature",
            AuthFailure::Expired => "session expired",
            AuthFailure::RoleMismatch => "insufficient role",
        }
    }

    /// Whether the client's session cookie is unusable and must be reset.
    /// A role mismatch leaves a perfectly valid session in place.
    pub fn clears_session(&self) -> bool {
        matches!(
            self,
            AuthFailure::MalformedSession | AuthFailure::InvalidSignature | AuthFailure::Expired
        )
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

impl From<SessionError> for AuthFailure {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::MissingSession => AuthFailure::MissingSession,
            SessionError::Malformed => AuthFailure::MalformedSession,
        }
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub subject_id: String,
    pub role: String,
    pub claims: SessionClaims,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin.as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthDecision {
    Authorized(Principal),
    Denied(AuthFailure),
}

#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    codec: TokenCodec,
}

impl AuthorizationGate {
    pub fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn authorize(
        &self,
        cookie_header: Option<&str>,
        required_role: Role,
        now_secs: u64,
    ) -> AuthDecision {
        match self.check(cookie_header, required_role, now_secs) {
            Ok(principal) => AuthDecision::Authorized(principal),
            Err(failure) => AuthDecision::Denied(failure),
        }
    }

    fn check(
        &self,
        cookie_header: Option<&str>,
        required_role: Role,
        now_secs: u64,
    ) -> Result<Principal, AuthFailure> {
        let raw = session::presence(cookie_header)?;
        let token = session::extract_token(raw)?;

        let claims = self.codec.decode(token).map_err(|err| match err {
            TokenError::InvalidSignature => AuthFailure::InvalidSignature,
            _ => AuthFailure::MalformedSession,
        })?;

        if claims.is_expired(now_secs) {
            return Err(AuthFailure::Expired);
        }

        if !required_role.admits(&claims.role) {
            return Err(AuthFailure::RoleMismatch);
        }

        Ok(Principal {
            subject_id: claims.sub.clone(),
            role: claims.role.clone(),
            claims,
        })
    }
}
