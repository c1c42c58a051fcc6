use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{require_non_empty, AppState};
use crate::{
    auth_token::now_secs,
    db::models::{normalize_email, Customer, MIN_PASSWORD_LEN},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
    routing::Role,
};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: &'static str,
    pub expires_at: u64,
}

pub fn validate_registration(req: &RegisterRequest) -> Result<()> {
    require_non_empty("name", &req.name)?;
    if !req.email.contains('@') {
        return Err(ShopServerError::Validation(
            "A valid email is required".to_string(),
        ));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ShopServerError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub async fn register_customer(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let req: RegisterRequest = ctx.json()?;
    validate_registration(&req)?;

    let customers = state.db.customers();
    if customers
        .find_by_email(&normalize_email(&req.email))
        .await?
        .is_some()
    {
        return Err(ShopServerError::Conflict(
            "Email is already registered".to_string(),
        ));
    }

    let mut customer = Customer::new(req.name.trim().to_string(), req.email, &req.password)?;
    customer.phone = req.phone;
    customer.address = req.address;
    let id = customers.insert(&customer).await?;

    log::info!("Registered customer {} ({})", customer.email, id);

    HandlerResponse::created(
        json!({ "id": id.to_hex(), "name": customer.name, "email": customer.email }),
        "Registration successful",
    )
}

fn issue_session(
    state: &AppState,
    subject_id: String,
    name: String,
    email: String,
    role: Role,
) -> Result<HandlerResponse> {
    let issued_at = now_secs();
    let mut extra = BTreeMap::new();
    extra.insert("name".to_string(), json!(name));
    extra.insert("email".to_string(), json!(email));

    let token = state
        .tokens
        .issue_session_token(&subject_id, role.as_str(), extra, issued_at)
        .map_err(|err| ShopServerError::Internal(format!("Failed to issue session token: {err}")))?;

    let view = SessionView {
        id: subject_id,
        name,
        email,
        role: role.as_str(),
        expires_at: issued_at.saturating_add(state.tokens.ttl().as_secs()),
    };

    Ok(HandlerResponse::ok(view, "Login successful")?.issuing_session(token))
}

pub async fn login_customer(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let req: LoginRequest = ctx.json()?;
    let email = normalize_email(&req.email);
    log::info!("Customer login attempt for {}", email);

    let customers = state.db.customers();
    let customer = customers
        .find_by_email(&email)
        .await?
        .ok_or(ShopServerError::InvalidCredentials)?;

    if !customer.verify_password(&req.password)? {
        log::warn!("Failed customer login for {}", email);
        return Err(ShopServerError::InvalidCredentials);
    }

    let id = customer
        .id
        .ok_or_else(|| ShopServerError::Internal("customer without id".to_string()))?;
    customers.update_last_login(&id).await?;

    issue_session(&state, id.to_hex(), customer.name, customer.email, Role::Customer)
}

pub async fn login_employee(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let req: LoginRequest = ctx.json()?;
    let email = normalize_email(&req.email);
    log::info!("Employee login attempt for {}", email);

    let employees = state.db.employees();
    let employee = employees
        .find_by_email(&email)
        .await?
        .ok_or(ShopServerError::InvalidCredentials)?;

    if !employee.verify_password(&req.password)? {
        log::warn!("Failed employee login for {}", email);
        return Err(ShopServerError::InvalidCredentials);
    }

    let id = employee
        .id
        .ok_or_else(|| ShopServerError::Internal("employee without id".to_string()))?;
    employees.update_last_login(&id).await?;

    issue_session(&state, id.to_hex(), employee.name, employee.email, Role::Admin)
}

pub async fn logout(ctx: HandlerContext) -> Result<HandlerResponse> {
    if let Some(principal) = &ctx.principal {
        log::info!("Logged out {} ({})", principal.subject_id, principal.role);
    }
    Ok(HandlerResponse::message("Logout successful").clearing_session())
}

pub async fn me(ctx: HandlerContext) -> Result<HandlerResponse> {
    let principal = ctx.principal()?;
    let claims = &principal.claims;

    HandlerResponse::ok(
        json!({
            "id": principal.subject_id,
            "role": principal.role,
            "name": claims.claim("name"),
            "email": claims.claim("email"),
            "issued_at": claims.iat,
            "expires_at": claims.exp,
        }),
        "Current session",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_token::SessionClaims;
    use crate::middleware::Principal;

    fn register(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Rosa".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            phone: None,
            address: None,
        }
    }

    #[test]
    fn registration_validation() {
        assert!(validate_registration(&register("rosa@example.com", "password123")).is_ok());
        assert!(validate_registration(&register("rosa.example.com", "password123")).is_err());
        assert!(validate_registration(&register("rosa@example.com", "short")).is_err());
    }

    #[actix_web::test]
    async fn logout_clears_session() {
        let ctx = HandlerContext {
            params: Default::default(),
            body: None,
            principal: None,
        };
        let response = logout(ctx).await.unwrap();
        assert_eq!(response.session, crate::dispatch::SessionDirective::Clear);
    }

    #[actix_web::test]
    async fn me_echoes_principal_claims() {
        let claims = SessionClaims::new("abc", "customer", 10, 20)
            .with_claim("name", json!("Rosa"));
        let ctx = HandlerContext {
            params: Default::default(),
            body: None,
            principal: Some(Principal {
                subject_id: "abc".to_string(),
                role: "customer".to_string(),
                claims,
            }),
        };

        let response = me(ctx).await.unwrap();
        assert_eq!(response.data["id"], "abc");
        assert_eq!(response.data["name"], "Rosa");
        assert_eq!(response.data["expires_at"], 20);
    }
}
