use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};

use super::{caller_id, hex_id, id_param, require_non_empty, AppState};
use crate::{
    db::models::{normalize_email, Employee, MIN_PASSWORD_LEN},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
};

#[derive(Debug, Serialize)]
pub struct EmployeeView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub position: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<Employee> for EmployeeView {
    fn from(employee: Employee) -> Self {
        Self {
            id: hex_id(&employee.id),
            name: employee.name,
            email: employee.email,
            position: employee.position,
            created_at: employee.created_at,
            last_login: employee.last_login,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployeeRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_position")]
    pub position: String,
}

fn default_position() -> String {
    "Staff".to_string()
}

pub async fn get_all_employees(state: AppState, _ctx: HandlerContext) -> Result<HandlerResponse> {
    let employees = state
        .db
        .employees()
        .find_sorted(doc! {}, doc! { "name": 1 })
        .await?;
    let views: Vec<EmployeeView> = employees.into_iter().map(EmployeeView::from).collect();
    HandlerResponse::ok(views, "Employees retrieved")
}

pub async fn create_employee(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let req: CreateEmployeeRequest = ctx.json()?;
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

    let employees = state.db.employees();
    if employees
        .find_by_email(&normalize_email(&req.email))
        .await?
        .is_some()
    {
        return Err(ShopServerError::Conflict(
            "Email is already registered".to_string(),
        ));
    }

    let mut employee = Employee::new(
        req.name.trim().to_string(),
        req.email,
        req.position,
        &req.password,
    )?;
    employee.id = Some(employees.insert(&employee).await?);

    log::info!("Created employee account {}", employee.email);
    HandlerResponse::created(EmployeeView::from(employee), "Employee created")
}

pub async fn delete_employee(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    if id == caller_id(&ctx)? {
        return Err(ShopServerError::Forbidden(
            "You cannot delete your own account".to_string(),
        ));
    }

    if !state.db.employees().delete_by_id(&id).await? {
        return Err(ShopServerError::not_found("Employee"));
    }
    log::info!("Deleted employee {}", id);
    Ok(HandlerResponse::message("Employee deleted"))
}
