use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, Document};
use serde::{Deserialize, Serialize};

use super::{caller_id, hex_id, id_param, require_non_empty, AppState};
use crate::{
    db::models::{hash_password, Customer, MIN_PASSWORD_LEN},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
};

/// Customer record without the password hash.
#[derive(Debug, Serialize)]
pub struct CustomerView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<Customer> for CustomerView {
    fn from(customer: Customer) -> Self {
        Self {
            id: hex_id(&customer.id),
            name: customer.name,
            email: customer.email,
            phone: customer.phone,
            address: customer.address,
            created_at: customer.created_at,
            last_login: customer.last_login,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub password: Option<String>,
}

impl UpdateProfileRequest {
    pub fn to_changes(&self) -> Result<Document> {
        let mut changes = Document::new();
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
            changes.insert("name", name.trim());
        }
        if let Some(phone) = &self.phone {
            changes.insert("phone", phone.trim());
        }
        if let Some(address) = &self.address {
            changes.insert("address", address.trim());
        }
        if let Some(password) = &self.password {
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(ShopServerError::Validation(format!(
                    "Password must be at least {MIN_PASSWORD_LEN} characters"
                )));
            }
            changes.insert("password_hash", hash_password(password)?);
        }
        if changes.is_empty() {
            return Err(ShopServerError::Validation("Nothing to update".to_string()));
        }
        Ok(changes)
    }
}

async fn find_customer(state: &AppState, id: &ObjectId) -> Result<Customer> {
    state
        .db
        .customers()
        .find_by_id(id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Customer"))
}

pub async fn get_all_customers(state: AppState, _ctx: HandlerContext) -> Result<HandlerResponse> {
    let customers = state
        .db
        .customers()
        .find_sorted(doc! {}, doc! { "created_at": -1 })
        .await?;
    let views: Vec<CustomerView> = customers.into_iter().map(CustomerView::from).collect();
    HandlerResponse::ok(views, "Customers retrieved")
}

pub async fn get_customer_by_id(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let customer = find_customer(&state, &id).await?;
    HandlerResponse::ok(CustomerView::from(customer), "Customer retrieved")
}

pub async fn delete_customer(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    if !state.db.customers().delete_by_id(&id).await? {
        return Err(ShopServerError::not_found("Customer"));
    }
    state.db.carts().delete_for_customer(&id).await?;
    log::info!("Deleted customer {}", id);
    Ok(HandlerResponse::message("Customer deleted"))
}

pub async fn get_profile(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = caller_id(&ctx)?;
    let customer = find_customer(&state, &id).await?;
    HandlerResponse::ok(CustomerView::from(customer), "Profile retrieved")
}

pub async fn update_profile(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = caller_id(&ctx)?;
    let req: UpdateProfileRequest = ctx.json()?;
    let changes = req.to_changes()?;

    if !state.db.customers().update_by_id(&id, changes).await? {
        return Err(ShopServerError::not_found("Customer"));
    }
    let customer = find_customer(&state, &id).await?;
    HandlerResponse::ok(CustomerView::from(customer), "Profile updated")
}
