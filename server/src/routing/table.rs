//! The ordered, read-only set of API routes.

use std::collections::HashSet;
use std::fmt;

use actix_web::http::Method;
use serde::{Deserialize, Serialize};

use crate::config::RouteEntry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteConfigError {
    #[error("route pattern `{0}` contains an empty segment")]
    EmptySegment(String),

    #[error("route pattern `{0}` has a parameter without a name")]
    UnnamedParam(String),

    #[error("route pattern `{pattern}` binds `{name}` more than once")]
    DuplicateParam { pattern: String, name: String },

    #[error("handler reference `{0}` must look like Controller@method")]
    InvalidHandlerRef(String),

    #[error("route `{pattern}` declares unsupported method `{method}`")]
    UnsupportedMethod { pattern: String, method: String },

    #[error("route `{pattern}` references unregistered handler `{handler}`")]
    UnknownHandler { pattern: String, handler: String },

    #[error("handler `{0}` is registered twice")]
    DuplicateHandler(String),
}

/// Which session role a route demands. `Both` admits any authenticated role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
    #[default]
    Both,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Customer => "customer",
            Role::Both => "both",
        }
    }

    pub fn admits(&self, token_role: &str) -> bool {
        match self {
            Role::Both => true,
            required => required.as_str() == token_role,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"Controller@method"`, resolved against the handler registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerRef {
    controller: String,
    method: String,
}

impl HandlerRef {
    pub fn parse(raw: &str) -> Result<Self, RouteConfigError> {
        match raw.trim().split_once('@') {
            Some((controller, method))
                if !controller.is_empty() && !method.is_empty() && !method.contains('@') =>
            {
                Ok(Self {
                    controller: controller.to_string(),
                    method: method.to_string(),
                })
            }
            _ => Err(RouteConfigError::InvalidHandlerRef(raw.to_string())),
        }
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.controller, self.method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// A canonical pattern: one leading `/`, no empty segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Result<Self, RouteConfigError> {
        let trimmed = raw.trim();
        let raw = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };

        let mut seen = HashSet::new();
        let mut segments = Vec::new();
        for segment in raw[1..].split('/') {
            if segment.is_empty() {
                return Err(RouteConfigError::EmptySegment(raw.clone()));
            }

            match segment.strip_prefix(':') {
                Some("") => return Err(RouteConfigError::UnnamedParam(raw.clone())),
                Some(name) => {
                    if !seen.insert(name) {
                        return Err(RouteConfigError::DuplicateParam {
                            pattern: raw.clone(),
                            name: name.to_string(),
                        });
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(segment.to_string())),
            }
        }

        Ok(Self { raw, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    pub pattern: RoutePattern,
    pub handler_ref: HandlerRef,
    pub auth_required: bool,
    pub required_role: Role,
    /// POST/PUT may arrive without a usable JSON body (logout and friends).
    pub body_optional: bool,
    /// Empty means every dispatchable method.
    pub methods: Vec<Method>,
    pub rate_limited: bool,
}

impl RouteDescriptor {
    pub fn from_entry(entry: &RouteEntry) -> Result<Self, RouteConfigError> {
        let pattern = RoutePattern::parse(&entry.pattern)?;
        let handler_ref = HandlerRef::parse(&entry.handler)?;

        let methods = entry
            .methods
            .iter()
            .map(|raw| match raw.trim().to_ascii_uppercase().as_str() {
                "GET" => Ok(Method::GET),
                "POST" => Ok(Method::POST),
                "PUT" => Ok(Method::PUT),
                "DELETE" => Ok(Method::DELETE),
                _ => Err(RouteConfigError::UnsupportedMethod {
                    pattern: pattern.as_str().to_string(),
                    method: raw.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            pattern,
            handler_ref,
            auth_required: entry.auth_required,
            required_role: entry.required_role,
            body_optional: entry.body_optional,
            methods,
            rate_limited: entry.rate_limited,
        })
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

/// Routes in declaration order. Built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteDescriptor>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteDescriptor>) -> Self {
        Self { routes }
    }

    pub fn from_config(entries: &[RouteEntry]) -> Result<Self, RouteConfigError> {
        let routes = entries
            .iter()
            .map(RouteDescriptor::from_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(routes))
    }

    pub fn all_routes(&self) -> impl Iterator<Item = (&str, &RouteDescriptor)> {
        self.routes.iter().map(|route| (route.pattern.as_str(), route))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
