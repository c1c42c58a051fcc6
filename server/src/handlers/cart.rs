use std::collections::HashMap;

use mongodb::bson::{doc, oid::ObjectId};
use serde::{Deserialize, Serialize};

use super::{caller_id, id_param, parse_object_id, AppState};
use crate::{
    db::models::{round_currency, Cart, Product},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
};

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartItemView {
    pub product_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub subtotal: f64,
    pub in_stock: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartView {
    pub items: Vec<CartItemView>,
    pub item_count: i64,
    pub total: f64,
}

/// Prices a cart against current product data. Lines whose product no
/// longer exists are dropped.
pub fn price_cart(cart: &Cart, products: &HashMap<ObjectId, Product>) -> CartView {
    let items: Vec<CartItemView> = cart
        .items
        .iter()
        .filter_map(|line| {
            let product = products.get(&line.product_id)?;
            Some(CartItemView {
                product_id: line.product_id.to_hex(),
                name: product.name.clone(),
                unit_price: product.price,
                quantity: line.quantity,
                subtotal: round_currency(product.price * line.quantity as f64),
                in_stock: product.stock >= line.quantity,
            })
        })
        .collect();

    CartView {
        item_count: items.iter().map(|item| item.quantity).sum(),
        total: round_currency(items.iter().map(|item| item.subtotal).sum()),
        items,
    }
}

pub(crate) async fn load_products(
    state: &AppState,
    ids: impl Iterator<Item = ObjectId>,
) -> Result<HashMap<ObjectId, Product>> {
    let ids: Vec<ObjectId> = ids.collect();
    let products = state
        .db
        .products()
        .find_many(doc! { "_id": { "$in": ids } })
        .await?;
    Ok(products
        .into_iter()
        .filter_map(|product| product.id.map(|id| (id, product)))
        .collect())
}

async fn render(state: &AppState, cart: &Cart, message: &str) -> Result<HandlerResponse> {
    let products = load_products(state, cart.items.iter().map(|line| line.product_id)).await?;
    HandlerResponse::ok(price_cart(cart, &products), message)
}

fn validate_quantity(quantity: i64) -> Result<()> {
    if quantity < 1 {
        return Err(ShopServerError::Validation(
            "Quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Quantity after adding to an existing line.
fn merged_quantity(current: i64, added: i64) -> Result<i64> {
    current
        .checked_add(added)
        .ok_or_else(|| ShopServerError::Validation("Quantity is too large".to_string()))
}

async fn find_product(state: &AppState, product_id: &ObjectId) -> Result<Product> {
    state
        .db
        .products()
        .find_by_id(product_id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Product"))
}

fn ensure_stock(product: &Product, wanted: i64) -> Result<()> {
    if wanted > product.stock {
        return Err(ShopServerError::Conflict(format!(
            "Only {} of '{}' in stock",
            product.stock, product.name
        )));
    }
    Ok(())
}

pub async fn get_cart(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let cart = state.db.carts().find_for_customer(&customer_id).await?;
    render(&state, &cart, "Cart retrieved").await
}

pub async fn add_item(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let req: AddItemRequest = ctx.json()?;
    validate_quantity(req.quantity)?;
    let product_id = parse_object_id(&req.product_id)?;
    let product = find_product(&state, &product_id).await?;

    let carts = state.db.carts();
    let mut cart = carts.find_for_customer(&customer_id).await?;
    let quantity = merged_quantity(cart.quantity_of(&product_id), req.quantity)?;
    ensure_stock(&product, quantity)?;

    cart.set_quantity(product_id, quantity);
    let cart = carts.save_items(&customer_id, &cart.items).await?;
    render(&state, &cart, "Item added to cart").await
}

pub async fn update_item(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let product_id = id_param(&ctx, "productId")?;
    let req: UpdateItemRequest = ctx.json()?;
    validate_quantity(req.quantity)?;

    let carts = state.db.carts();
    let mut cart = carts.find_for_customer(&customer_id).await?;
    if cart.quantity_of(&product_id) == 0 {
        return Err(ShopServerError::not_found("Cart item"));
    }
    let product = find_product(&state, &product_id).await?;
    ensure_stock(&product, req.quantity)?;

    cart.set_quantity(product_id, req.quantity);
    let cart = carts.save_items(&customer_id, &cart.items).await?;
    render(&state, &cart, "Cart item updated").await
}

pub async fn remove_item(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let product_id = id_param(&ctx, "productId")?;

    let carts = state.db.carts();
    let mut cart = carts.find_for_customer(&customer_id).await?;
    if cart.quantity_of(&product_id) == 0 {
        return Err(ShopServerError::not_found("Cart item"));
    }

    cart.set_quantity(product_id, 0);
    let cart = carts.save_items(&customer_id, &cart.items).await?;
    render(&state, &cart, "Item removed from cart").await
}

pub async fn clear_cart(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    state.db.carts().clear(&customer_id).await?;
    Ok(HandlerResponse::message("Cart cleared"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(name: &str, price: f64, stock: i64) -> Product {
        Product {
            id: Some(ObjectId::new()),
            name: name.to_string(),
            description: String::new(),
            price,
            stock,
            category_id: ObjectId::new(),
            image_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn prices_cart_lines() {
        let monstera = product("Monstera", 24.99, 10);
        let pothos = product("Pothos", 8.5, 1);
        let customer = ObjectId::new();

        let mut cart = Cart::empty(customer);
        cart.set_quantity(monstera.id.unwrap(), 2);
        cart.set_quantity(pothos.id.unwrap(), 3);

        let products: HashMap<_, _> = [monstera, pothos]
            .into_iter()
            .map(|p| (p.id.unwrap(), p))
            .collect();
        let view = price_cart(&cart, &products);

        assert_eq!(view.items.len(), 2);
        assert_eq!(view.item_count, 5);
        assert_eq!(view.total, 75.48);
        assert!(view.items[0].in_stock);
        assert!(!view.items[1].in_stock);
    }

    #[test]
    fn drops_lines_for_deleted_products() {
        let mut cart = Cart::empty(ObjectId::new());
        cart.set_quantity(ObjectId::new(), 4);

        let view = price_cart(&cart, &HashMap::new());
        assert!(view.items.is_empty());
        assert_eq!(view.total, 0.0);
    }

    #[test]
    fn stock_and_quantity_checks() {
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(1).is_ok());

        let fern = product("Boston Fern", 12.0, 2);
        assert!(ensure_stock(&fern, 2).is_ok());
        assert!(matches!(
            ensure_stock(&fern, 3),
            Err(ShopServerError::Conflict(_))
        ));
    }

    #[test]
    fn huge_additions_are_rejected_not_wrapped() {
        assert_eq!(merged_quantity(2, 3).unwrap(), 5);
        assert!(matches!(
            merged_quantity(1, i64::MAX),
            Err(ShopServerError::Validation(_))
        ));
    }
}
