//! Request dispatch: match → authorize → read payload → invoke handler.
//!
//! Every step either advances or ends the request with a terminal
//! [`DispatchOutcome`]. Nothing is retried and nothing is shared between
//! requests except the frozen route table and handler registry.

pub mod http;
pub mod registry;

use std::net::IpAddr;
use std::sync::Arc;

use actix_web::http::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::auth_token::now_secs;
use crate::error::{Result, ShopServerError};
use crate::middleware::{AuthDecision, AuthFailure, AuthorizationGate, Principal, RateLimiter};
use crate::routing::{PathParams, RouteConfigError, RouteDescriptor, RouteMatcher, RouteTable};

pub use registry::{Handler, HandlerFuture, HandlerRegistry};

/// Which validation runs first when a request could fail both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOrder {
    #[default]
    AuthFirst,
    BodyFirst,
}

/// What the handler wants done with the caller's session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionDirective {
    #[default]
    Keep,
    Issue(String),
    Clear,
}

#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub params: PathParams,
    pub body: Option<serde_json::Value>,
    pub principal: Option<Principal>,
}

impl HandlerContext {
    pub fn param(&self, name: &str) -> Result<&str> {
        self.params.get(name).ok_or_else(|| {
            ShopServerError::Validation(format!("Missing path parameter `{name}`"))
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| ShopServerError::Validation("Request body is required".to_string()))?;
        Ok(serde_json::from_value(body)?)
    }

    pub fn principal(&self) -> Result<&Principal> {
        self.principal.as_ref().ok_or(ShopServerError::Unauthorized)
    }
}

#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub message: String,
    pub data: serde_json::Value,
    pub session: SessionDirective,
}

impl HandlerResponse {
    pub fn ok<T: Serialize>(data: T, message: impl Into<String>) -> Result<Self> {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn created<T: Serialize>(data: T, message: impl Into<String>) -> Result<Self> {
        Self::with_status(StatusCode::CREATED, data, message)
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
            data: serde_json::Value::Null,
            session: SessionDirective::Keep,
        }
    }

    fn with_status<T: Serialize>(
        status: StatusCode,
        data: T,
        message: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            status,
            message: message.into(),
            data: serde_json::to_value(data)?,
            session: SessionDirective::Keep,
        })
    }

    pub fn issuing_session(mut self, token: String) -> Self {
        self.session = SessionDirective::Issue(token);
        self
    }

    pub fn clearing_session(mut self) -> Self {
        self.session = SessionDirective::Clear;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub cookie_header: Option<&'a str>,
    pub body: &'a [u8],
    pub client_ip: Option<IpAddr>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Success(HandlerResponse),
    NotFound,
    MethodNotAllowed,
    BadRequest(String),
    Unauthorized(AuthFailure),
    RateLimited,
    HandlerFailed(ShopServerError),
}

impl DispatchOutcome {
    pub fn status_code(&self) -> StatusCode {
        use actix_web::ResponseError;

        match self {
            DispatchOutcome::Success(response) => response.status,
            DispatchOutcome::NotFound => StatusCode::NOT_FOUND,
            DispatchOutcome::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DispatchOutcome::BadRequest(_) => StatusCode::BAD_REQUEST,
            DispatchOutcome::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DispatchOutcome::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DispatchOutcome::HandlerFailed(err) => err.status_code(),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    matcher: RouteMatcher,
    registry: Arc<HandlerRegistry>,
    gate: AuthorizationGate,
    check_order: CheckOrder,
    rate_limiter: Option<RateLimiter>,
}

impl Dispatcher {
    /// Fails when a route points at a handler the registry does not know.
    pub fn new(
        table: Arc<RouteTable>,
        registry: HandlerRegistry,
        gate: AuthorizationGate,
        check_order: CheckOrder,
    ) -> std::result::Result<Self, RouteConfigError> {
        registry.validate(&table)?;

        Ok(Self {
            matcher: RouteMatcher::new(table),
            registry: Arc::new(registry),
            gate,
            check_order,
            rate_limiter: None,
        })
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    pub fn check_order(&self) -> CheckOrder {
        self.check_order
    }

    pub async fn handle(&self, request: DispatchRequest<'_>) -> DispatchOutcome {
        self.handle_at(request, now_secs()).await
    }

    pub async fn handle_at(&self, request: DispatchRequest<'_>, now: u64) -> DispatchOutcome {
        let Some(found) = self.matcher.match_path(request.path) else {
            log::debug!("No route for {} {}", request.method, request.path);
            return DispatchOutcome::NotFound;
        };
        let route = found.route();

        if route.rate_limited && !self.within_rate_limit(request.client_ip) {
            log::warn!(
                "Rate limit exceeded for {:?} on {}",
                request.client_ip,
                route.pattern.as_str()
            );
            return DispatchOutcome::RateLimited;
        }

        let checked = match self.check_order {
            CheckOrder::AuthFirst => self
                .authorize(route, request.cookie_header, now)
                .and_then(|principal| {
                    read_payload(route, request.method, request.body).map(|body| (principal, body))
                }),
            CheckOrder::BodyFirst => read_payload(route, request.method, request.body).and_then(
                |body| {
                    self.authorize(route, request.cookie_header, now)
                        .map(|principal| (principal, body))
                },
            ),
        };
        let (principal, body) = match checked {
            Ok(checked) => checked,
            Err(outcome) => return outcome,
        };

        let Some(handler) = self.registry.resolve(&route.handler_ref) else {
            return DispatchOutcome::HandlerFailed(ShopServerError::Internal(format!(
                "handler {} is not registered",
                route.handler_ref
            )));
        };

        let handler_ref = route.handler_ref.clone();
        let context = HandlerContext {
            params: found.into_params(),
            body,
            principal,
        };

        match handler(context).await {
            Ok(response) => DispatchOutcome::Success(response),
            Err(err) => {
                log::error!("{} failed: {}", handler_ref, err);
                DispatchOutcome::HandlerFailed(err)
            }
        }
    }

    fn within_rate_limit(&self, client_ip: Option<IpAddr>) -> bool {
        match (&self.rate_limiter, client_ip) {
            (None, _) => true,
            (Some(limiter), Some(ip)) => limiter.check_rate_limit(ip),
            (Some(_), None) => false,
        }
    }

    fn authorize(
        &self,
        route: &RouteDescriptor,
        cookie_header: Option<&str>,
        now: u64,
    ) -> std::result::Result<Option<Principal>, DispatchOutcome> {
        if !route.auth_required {
            return Ok(None);
        }

        match self.gate.authorize(cookie_header, route.required_role, now) {
            AuthDecision::Authorized(principal) => Ok(Some(principal)),
            AuthDecision::Denied(failure) => {
                log::warn!(
                    "Denied {} ({}): {}",
                    route.pattern.as_str(),
                    route.required_role,
                    failure
                );
                Err(DispatchOutcome::Unauthorized(failure))
            }
        }
    }
}

/// GET and DELETE carry no payload; POST and PUT need a JSON object unless
/// the route is flagged `body_optional`.
fn read_payload(
    route: &RouteDescriptor,
    method: &Method,
    body: &[u8],
) -> std::result::Result<Option<serde_json::Value>, DispatchOutcome> {
    if !route.allows_method(method) {
        return Err(DispatchOutcome::MethodNotAllowed);
    }

    match *method {
        Method::GET | Method::DELETE => Ok(None),
        Method::POST | Method::PUT => parse_body(body, route.body_optional),
        _ => Err(DispatchOutcome::MethodNotAllowed),
    }
}

fn parse_body(
    body: &[u8],
    optional: bool,
) -> std::result::Result<Option<serde_json::Value>, DispatchOutcome> {
    let rejected = |message: &str| {
        if optional {
            Ok(None)
        } else {
            Err(DispatchOutcome::BadRequest(message.to_string()))
        }
    };

    if body.iter().all(u8::is_ascii_whitespace) {
        return rejected("Request body is required");
    }

    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(Some(value)),
        Ok(_) => rejected("Request body must be a JSON object"),
        Err(_) => rejected("Request body is not valid JSON"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_token::{HashAlgorithm, SessionClaims, TokenCodec};
    use crate::config::RouteEntry;
    use crate::routing::Role;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const NOW: u64 = 1_700_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            b"01234567890123456789012345678901".to_vec(),
            HashAlgorithm::Hs256,
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    fn route(pattern: &str, handler: &str, auth: Option<Role>) -> RouteEntry {
        RouteEntry {
            pattern: pattern.to_string(),
            handler: handler.to_string(),
            auth_required: auth.is_some(),
            required_role: auth.unwrap_or_default(),
            ..RouteEntry::default()
        }
    }

    async fn echo(ctx: HandlerContext) -> Result<HandlerResponse> {
        let params: std::collections::BTreeMap<&str, &str> = ctx.params.iter().collect();
        HandlerResponse::ok(
            serde_json::json!({
                "params": params,
                "body": ctx.body,
                "subject": ctx.principal.as_ref().map(|p| p.subject_id.clone()),
            }),
            "echo",
        )
    }

    async fn failing(_ctx: HandlerContext) -> Result<HandlerResponse> {
        Err(ShopServerError::Conflict("Category still has products".to_string()))
    }

    fn dispatcher(check_order: CheckOrder) -> Dispatcher {
        let mut logout = route("/api/auth/logout", "AuthController@logout", Some(Role::Both));
        logout.body_optional = true;
        let mut login = route("/api/auth/customer/login", "AuthController@loginCustomer", None);
        login.rate_limited = true;
        let mut create = route("/api/product/create", "ProductsController@createProduct", Some(Role::Admin));
        create.methods = vec!["POST".to_string()];

        let table = RouteTable::from_config(&[
            route("/api/product/id/:id", "ProductsController@getProductByID", None),
            route("/api/cart/add", "CartController@addItem", Some(Role::Customer)),
            route("/api/category/delete/:id", "CategoriesController@deleteCategory", Some(Role::Admin)),
            route("/api/orders/:id", "OrdersController@getOrderByID", Some(Role::Both)),
            route("/api/category/create", "CategoriesController@createCategory", Some(Role::Admin)),
            logout,
            login,
            create,
        ])
        .unwrap();

        let mut registry = HandlerRegistry::new();
        for handler in [
            "ProductsController@getProductByID",
            "CartController@addItem",
            "CategoriesController@deleteCategory",
            "OrdersController@getOrderByID",
            "AuthController@logout",
            "AuthController@loginCustomer",
            "ProductsController@createProduct",
        ] {
            registry.register(handler, echo).unwrap();
        }
        registry
            .register("CategoriesController@createCategory", failing)
            .unwrap();

        Dispatcher::new(
            Arc::new(table),
            registry,
            AuthorizationGate::new(codec()),
            check_order,
        )
        .unwrap()
        .with_rate_limiter(RateLimiter::new(2, Duration::from_secs(60)))
    }

    fn cookie(role: &str, exp: u64) -> String {
        let token = codec()
            .encode(&SessionClaims::new("user-9", role, NOW - 60, exp))
            .unwrap();
        format!("access_token={token}")
    }

    fn request<'a>(method: &'a Method, path: &'a str, cookie: Option<&'a str>, body: &'a [u8]) -> DispatchRequest<'a> {
        DispatchRequest {
            method,
            path,
            cookie_header: cookie,
            body,
            client_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        }
    }

    fn data(outcome: DispatchOutcome) -> serde_json::Value {
        match outcome {
            DispatchOutcome::Success(response) => response.data,
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[actix_web::test]
    async fn public_route_skips_auth_and_binds_params() {
        let dispatcher = dispatcher(CheckOrder::AuthFirst);
        // An unusable cookie is never looked at on a public route.
        let outcome = dispatcher
            .handle_at(request(&Method::GET, "/api/product/id/42", Some("access_token=garbage"), b""), NOW)
            .await;

        let data = data(outcome);
        assert_eq!(data["params"]["id"], "42");
        assert!(data["subject"].is_null());
        assert!(data["body"].is_null());
    }

    #[actix_web::test]
    async fn unknown_path_is_not_found() {
        let outcome = dispatcher(CheckOrder::AuthFirst)
            .handle_at(request(&Method::GET, "/api/nothing", None, b""), NOW)
            .await;
        assert!(matches!(outcome, DispatchOutcome::NotFound));
        assert_eq!(outcome.status_code(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn empty_body_with_auth_first() {
        let dispatcher = dispatcher(CheckOrder::AuthFirst);

        let outcome = dispatcher
            .handle_at(request(&Method::POST, "/api/cart/add", None, b""), NOW)
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Unauthorized(AuthFailure::MissingSession)
        ));

        let customer = cookie("customer", NOW + 60);
        let outcome = dispatcher
            .handle_at(request(&Method::POST, "/api/cart/add", Some(customer.as_str()), b""), NOW)
            .await;
        assert!(matches!(outcome, DispatchOutcome::BadRequest(_)));
    }

    #[actix_web::test]
    async fn empty_body_with_body_first() {
        let dispatcher = dispatcher(CheckOrder::BodyFirst);

        let outcome = dispatcher
            .handle_at(request(&Method::POST, "/api/cart/add", None, b""), NOW)
            .await;
        assert!(matches!(outcome, DispatchOutcome::BadRequest(_)));

        let outcome = dispatcher
            .handle_at(request(&Method::POST, "/api/cart/add", None, br#"{"product_id":"p1"}"#), NOW)
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Unauthorized(AuthFailure::MissingSession)
        ));
    }

    #[actix_web::test]
    async fn post_with_valid_body_reaches_handler() {
        let customer = cookie("customer", NOW + 60);
        let outcome = dispatcher(CheckOrder::AuthFirst)
            .handle_at(
                request(&Method::POST, "/api/cart/add", Some(customer.as_str()), br#"{"product_id":"p1","quantity":2}"#),
                NOW,
            )
            .await;

        let data = data(outcome);
        assert_eq!(data["body"]["quantity"], 2);
        assert_eq!(data["subject"], "user-9");
    }

    #[actix_web::test]
    async fn non_object_or_invalid_json_is_bad_request() {
        let dispatcher = dispatcher(CheckOrder::AuthFirst);
        let customer = cookie("customer", NOW + 60);

        let bodies: [&[u8]; 4] = [b"[1,2]", b"\"text\"", b"{not json", b"   "];
        for body in bodies {
            let outcome = dispatcher
                .handle_at(request(&Method::PUT, "/api/cart/add", Some(customer.as_str()), body), NOW)
                .await;
            assert!(matches!(outcome, DispatchOutcome::BadRequest(_)), "body {body:?}");
        }
    }

    #[actix_web::test]
    async fn body_optional_route_accepts_empty_post() {
        let customer = cookie("customer", NOW + 60);
        let outcome = dispatcher(CheckOrder::AuthFirst)
            .handle_at(request(&Method::POST, "/api/auth/logout", Some(customer.as_str()), b""), NOW)
            .await;

        assert!(data(outcome)["body"].is_null());
    }

    #[actix_web::test]
    async fn role_mismatch_on_admin_delete() {
        let customer = cookie("customer", NOW + 60);
        let outcome = dispatcher(CheckOrder::AuthFirst)
            .handle_at(request(&Method::DELETE, "/api/category/delete/7", Some(customer.as_str()), b""), NOW)
            .await;

        match outcome {
            DispatchOutcome::Unauthorized(failure) => {
                assert_eq!(failure, AuthFailure::RoleMismatch);
                assert!(!failure.clears_session());
            }
            other => panic!("expected unauthorized, got {other:?}"),
        }
    }

    #[actix_web::test]
    async fn admin_delete_passes_params_only() {
        let admin = cookie("admin", NOW + 60);
        let outcome = dispatcher(CheckOrder::AuthFirst)
            .handle_at(
                request(&Method::DELETE, "/api/category/delete/7", Some(admin.as_str()), br#"{"ignored":true}"#),
                NOW,
            )
            .await;

        let data = data(outcome);
        assert_eq!(data["params"]["id"], "7");
        assert!(data["body"].is_null());
    }

    #[actix_web::test]
    async fn expired_session_is_unauthorized() {
        let admin = cookie("admin", NOW - 1);
        let outcome = dispatcher(CheckOrder::AuthFirst)
            .handle_at(request(&Method::GET, "/api/orders/abc", Some(admin.as_str()), b""), NOW)
            .await;

        assert!(matches!(outcome, DispatchOutcome::Unauthorized(AuthFailure::Expired)));
    }

    #[actix_web::test]
    async fn both_role_route_accepts_each_role() {
        let dispatcher = dispatcher(CheckOrder::AuthFirst);
        for role in ["admin", "customer"] {
            let session = cookie(role, NOW + 60);
            let outcome = dispatcher
                .handle_at(request(&Method::GET, "/api/orders/abc", Some(session.as_str()), b""), NOW)
                .await;
            assert_eq!(data(outcome)["params"]["id"], "abc");
        }
    }

    #[actix_web::test]
    async fn unsupported_method() {
        let dispatcher = dispatcher(CheckOrder::AuthFirst);

        let outcome = dispatcher
            .handle_at(request(&Method::PATCH, "/api/product/id/1", None, b"{}"), NOW)
            .await;
        assert!(matches!(outcome, DispatchOutcome::MethodNotAllowed));

        let admin = cookie("admin", NOW + 60);
        let outcome = dispatcher
            .handle_at(request(&Method::GET, "/api/product/create", Some(admin.as_str()), b""), NOW)
            .await;
        assert!(matches!(outcome, DispatchOutcome::MethodNotAllowed));
    }

    #[actix_web::test]
    async fn handler_error_is_propagated() {
        let admin = cookie("admin", NOW + 60);
        let outcome = dispatcher(CheckOrder::AuthFirst)
            .handle_at(request(&Method::POST, "/api/category/create", Some(admin.as_str()), br#"{"name":"Ferns"}"#), NOW)
            .await;

        assert_eq!(outcome.status_code(), StatusCode::CONFLICT);
        assert!(matches!(
            outcome,
            DispatchOutcome::HandlerFailed(ShopServerError::Conflict(_))
        ));
    }

    #[actix_web::test]
    async fn rate_limited_route() {
        let dispatcher = dispatcher(CheckOrder::AuthFirst);
        let body = br#"{"email":"a@b.c","password":"x"}"#;

        for _ in 0..2 {
            let outcome = dispatcher
                .handle_at(request(&Method::POST, "/api/auth/customer/login", None, body), NOW)
                .await;
            assert!(matches!(outcome, DispatchOutcome::Success(_)));
        }

        let outcome = dispatcher
            .handle_at(request(&Method::POST, "/api/auth/customer/login", None, body), NOW)
            .await;
        assert!(matches!(outcome, DispatchOutcome::RateLimited));

        // Other routes are not counted.
        let outcome = dispatcher
            .handle_at(request(&Method::GET, "/api/product/id/1", None, b""), NOW)
            .await;
        assert!(matches!(outcome, DispatchOutcome::Success(_)));
    }

    #[test]
    fn dispatcher_rejects_unregistered_handlers() {
        let table = RouteTable::from_config(&[route("/api/products", "ProductsController@getAllProducts", None)]).unwrap();
        let result = Dispatcher::new(
            Arc::new(table),
            HandlerRegistry::new(),
            AuthorizationGate::new(codec()),
            CheckOrder::AuthFirst,
        );
        assert!(matches!(result, Err(RouteConfigError::UnknownHandler { .. })));
    }

    #[test]
    fn handler_context_helpers() {
        let ctx = HandlerContext {
            params: [("id", "42")].into_iter().collect(),
            body: Some(serde_json::json!({"name": "Monstera"})),
            principal: None,
        };

        assert_eq!(ctx.param("id").unwrap(), "42");
        assert!(matches!(ctx.param("slug"), Err(ShopServerError::Validation(_))));
        assert!(matches!(ctx.principal(), Err(ShopServerError::Unauthorized)));

        #[derive(Deserialize)]
        struct Named {
            name: String,
        }
        assert_eq!(ctx.json::<Named>().unwrap().name, "Monstera");
    }
}
