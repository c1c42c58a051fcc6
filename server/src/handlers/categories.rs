use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use super::{hex_id, id_param, require_non_empty, AppState};
use crate::{
    db::models::Category,
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
};

#[derive(Debug, Serialize)]
pub struct CategoryView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<Category> for CategoryView {
    fn from(category: Category) -> Self {
        Self {
            id: hex_id(&category.id),
            name: category.name,
            description: category.description,
            created_at: category.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

async fn ensure_unique_name(state: &AppState, name: &str) -> Result<()> {
    let existing = state.db.categories().find_one(doc! { "name": name }).await?;
    if existing.is_some() {
        return Err(ShopServerError::Conflict(format!(
            "Category '{name}' already exists"
        )));
    }
    Ok(())
}

pub async fn get_all_categories(state: AppState, _ctx: HandlerContext) -> Result<HandlerResponse> {
    let categories = state
        .db
        .categories()
        .find_sorted(doc! {}, doc! { "name": 1 })
        .await?;
    let views: Vec<CategoryView> = categories.into_iter().map(CategoryView::from).collect();
    HandlerResponse::ok(views, "Categories retrieved")
}

pub async fn get_category_by_id(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let category = state
        .db
        .categories()
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Category"))?;
    HandlerResponse::ok(CategoryView::from(category), "Category retrieved")
}

pub async fn create_category(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let req: CategoryRequest = ctx.json()?;
    require_non_empty("name", &req.name)?;
    let name = req.name.trim().to_string();
    ensure_unique_name(&state, &name).await?;

    let mut category = Category {
        id: None,
        name,
        description: req.description,
        created_at: Utc::now(),
    };
    category.id = Some(state.db.categories().insert(&category).await?);

    log::info!("Created category {}", category.name);
    HandlerResponse::created(CategoryView::from(category), "Category created")
}

pub async fn update_category(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let req: UpdateCategoryRequest = ctx.json()?;
    let categories = state.db.categories();

    let current = categories
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Category"))?;

    let mut changes = Document::new();
    if let Some(name) = &req.name {
        require_non_empty("name", name)?;
        let name = name.trim();
        if name != current.name {
            ensure_unique_name(&state, name).await?;
        }
        changes.insert("name", name);
    }
    if let Some(description) = &req.description {
        changes.insert("description", description.as_str());
    }
    if changes.is_empty() {
        return Err(ShopServerError::Validation("Nothing to update".to_string()));
    }

    categories.update_by_id(&id, changes).await?;
    let category = categories
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Category"))?;
    HandlerResponse::ok(CategoryView::from(category), "Category updated")
}

pub async fn delete_category(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;

    let in_use = state.db.products().count_in_category(&id).await?;
    if in_use > 0 {
        return Err(ShopServerError::Conflict(format!(
            "Category is still used by {in_use} products"
        )));
    }

    if !state.db.categories().delete_by_id(&id).await? {
        return Err(ShopServerError::not_found("Category"));
    }
    log::info!("Deleted category {}", id);
    Ok(HandlerResponse::message("Category deleted"))
}
