//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! [[routes]] config entries
//!     → table.rs (validate + freeze as RouteTable at startup)
//!
//! Incoming request path
//!     → matcher.rs (ordered scan, segment-wise comparison)
//!     → RouteMatch::Static | RouteMatch::Dynamic { params } | no match
//! ```

pub mod matcher;
pub mod table;

pub use matcher::{normalize_request_path, MatchResult, PathParams, RouteMatch, RouteMatcher};
pub use table::{HandlerRef, Role, RouteConfigError, RouteDescriptor, RoutePattern, RouteTable, Segment};
