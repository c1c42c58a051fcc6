use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, Document};
use serde::{Deserialize, Serialize};

use super::{hex_id, id_param, parse_object_id, require_non_empty, AppState};
use crate::{
    db::{models::Product, repository::timestamp},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
};

#[derive(Debug, Serialize)]
pub struct ProductView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: i64,
    pub category_id: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductView {
    fn from(product: Product) -> Self {
        Self {
            id: hex_id(&product.id),
            name: product.name,
            description: product.description,
            price: product.price,
            stock: product.stock,
            category_id: product.category_id.to_hex(),
            image_url: product.image_url,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

fn views(products: Vec<Product>) -> Vec<ProductView> {
    products.into_iter().map(ProductView::from).collect()
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub stock: i64,
    pub category_id: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub category_id: Option<String>,
    pub image_url: Option<String>,
}

fn validate_price(price: f64) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(ShopServerError::Validation(
            "Price must be zero or greater".to_string(),
        ));
    }
    Ok(())
}

fn validate_stock(stock: i64) -> Result<()> {
    if stock < 0 {
        return Err(ShopServerError::Validation(
            "Stock must be zero or greater".to_string(),
        ));
    }
    Ok(())
}

impl UpdateProductRequest {
    /// Validates the present fields and turns them into a `$set` document.
    pub fn to_changes(&self) -> Result<Document> {
        let mut changes = Document::new();
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
            changes.insert("name", name.trim());
        }
        if let Some(description) = &self.description {
            changes.insert("description", description.as_str());
        }
        if let Some(price) = self.price {
            validate_price(price)?;
            changes.insert("price", price);
        }
        if let Some(stock) = self.stock {
            validate_stock(stock)?;
            changes.insert("stock", stock);
        }
        if let Some(category_id) = &self.category_id {
            changes.insert("category_id", parse_object_id(category_id)?);
        }
        if let Some(image_url) = &self.image_url {
            changes.insert("image_url", image_url.as_str());
        }
        if changes.is_empty() {
            return Err(ShopServerError::Validation("Nothing to update".to_string()));
        }
        Ok(changes)
    }
}

async fn ensure_category(state: &AppState, category_id: &ObjectId) -> Result<()> {
    state
        .db
        .categories()
        .find_by_id(category_id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Category"))?;
    Ok(())
}

pub async fn get_all_products(state: AppState, _ctx: HandlerContext) -> Result<HandlerResponse> {
    let products = state.db.products().find_sorted(doc! {}, doc! { "name": 1 }).await?;
    HandlerResponse::ok(views(products), "Products retrieved")
}

pub async fn get_product_by_id(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let product = state
        .db
        .products()
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Product"))?;
    HandlerResponse::ok(ProductView::from(product), "Product retrieved")
}

pub async fn get_products_by_category(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let category_id = id_param(&ctx, "id")?;
    ensure_category(&state, &category_id).await?;
    let products = state.db.products().find_by_category(&category_id).await?;
    HandlerResponse::ok(views(products), "Products retrieved")
}

pub async fn search_products(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let term = ctx.param("term")?.trim();
    require_non_empty("search term", term)?;
    let products = state.db.products().search_by_name(term).await?;
    let message = format!("{} products found", products.len());
    HandlerResponse::ok(views(products), message)
}

pub async fn create_product(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let req: CreateProductRequest = ctx.json()?;
    require_non_empty("name", &req.name)?;
    validate_price(req.price)?;
    validate_stock(req.stock)?;
    let category_id = parse_object_id(&req.category_id)?;
    ensure_category(&state, &category_id).await?;

    let now = Utc::now();
    let mut product = Product {
        id: None,
        name: req.name.trim().to_string(),
        description: req.description,
        price: req.price,
        stock: req.stock,
        category_id,
        image_url: req.image_url,
        created_at: now,
        updated_at: now,
    };
    product.id = Some(state.db.products().insert(&product).await?);

    log::info!("Created product {} ({})", product.name, hex_id(&product.id));
    HandlerResponse::created(ProductView::from(product), "Product created")
}

pub async fn update_product(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let req: UpdateProductRequest = ctx.json()?;
    let mut changes = req.to_changes()?;
    if let Ok(category_id) = changes.get_object_id("category_id") {
        ensure_category(&state, &category_id).await?;
    }
    changes.insert("updated_at", timestamp());

    let products = state.db.products();
    if !products.update_by_id(&id, changes).await? {
        return Err(ShopServerError::not_found("Product"));
    }
    let product = products
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Product"))?;
    HandlerResponse::ok(ProductView::from(product), "Product updated")
}

pub async fn delete_product(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    if !state.db.products().delete_by_id(&id).await? {
        return Err(ShopServerError::not_found("Product"));
    }
    log::info!("Deleted product {}", id);
    Ok(HandlerResponse::message("Product deleted"))
}
