//! actix-web entry point: every API request lands here through
//! `App::default_service`.

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, ResponseError};

use super::{DispatchOutcome, DispatchRequest, Dispatcher, SessionDirective};
use crate::error::ShopServerError;
use crate::response;
use crate::session::{self, SessionCookies};

pub async fn dispatch_request(
    req: HttpRequest,
    body: web::Bytes,
    dispatcher: web::Data<Dispatcher>,
    cookies: web::Data<SessionCookies>,
) -> HttpResponse {
    let cookie_header = session::cookie_header(&req);
    let outcome = dispatcher
        .handle(DispatchRequest {
            method: req.method(),
            path: req.path(),
            cookie_header: cookie_header.as_deref(),
            body: &body,
            client_ip: req.peer_addr().map(|addr| addr.ip()),
        })
        .await;

    let secure = req.connection_info().scheme() == "https";
    render(outcome, &cookies, secure)
}

pub fn render(outcome: DispatchOutcome, cookies: &SessionCookies, secure: bool) -> HttpResponse {
    match outcome {
        DispatchOutcome::Success(handler_response) => {
            let mut resp = response::success(
                handler_response.data,
                handler_response.message,
                handler_response.status,
            );
            let cookie = match handler_response.session {
                SessionDirective::Keep => None,
                SessionDirective::Issue(token) => Some(cookies.issue(&token, secure)),
                SessionDirective::Clear => Some(cookies.clear(secure)),
            };
            if let Some(cookie) = cookie {
                if let Err(err) = resp.add_cookie(&cookie) {
                    log::error!("Failed to set session cookie: {}", err);
                }
            }
            resp
        }
        DispatchOutcome::Unauthorized(failure) => {
            let mut resp = response::unauthorized(failure.reason());
            if failure.clears_session() {
                if let Err(err) = resp.add_cookie(&cookies.clear(secure)) {
                    log::error!("Failed to clear session cookie: {}", err);
                }
            }
            resp
        }
        DispatchOutcome::NotFound => response::error("Route not found", StatusCode::NOT_FOUND),
        DispatchOutcome::MethodNotAllowed => {
            response::error("Method not allowed", StatusCode::METHOD_NOT_ALLOWED)
        }
        DispatchOutcome::BadRequest(message) => response::error(message, StatusCode::BAD_REQUEST),
        DispatchOutcome::RateLimited => ShopServerError::RateLimitExceeded.error_response(),
        DispatchOutcome::HandlerFailed(err) => err.error_response(),
    }
}
