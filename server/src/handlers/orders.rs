use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::{caller_id, cart::load_products, hex_id, id_param, AppState};
use crate::{
    db::models::{Order, OrderLine, OrderStatus},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
    middleware::Principal,
};

#[derive(Debug, Serialize)]
pub struct OrderLineView {
    pub product_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub subtotal: f64,
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: String,
    pub order_number: String,
    pub customer_id: String,
    pub items: Vec<OrderLineView>,
    pub total: f64,
    pub shipping_address: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            id: hex_id(&order.id),
            order_number: order.order_number,
            customer_id: order.customer_id.to_hex(),
            items: order
                .items
                .into_iter()
                .map(|line| OrderLineView {
                    product_id: line.product_id.to_hex(),
                    subtotal: line.subtotal(),
                    name: line.name,
                    unit_price: line.unit_price,
                    quantity: line.quantity,
                })
                .collect(),
            total: order.total,
            shipping_address: order.shipping_address,
            status: order.status,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

fn views(orders: Vec<Order>) -> Vec<OrderView> {
    orders.into_iter().map(OrderView::from).collect()
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub shipping_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// Checks a requested status change against the order lifecycle.
pub fn check_transition(current: OrderStatus, next: OrderStatus) -> Result<()> {
    if current.is_final() {
        return Err(ShopServerError::Conflict(format!(
            "Order is already {}",
            current.as_str()
        )));
    }
    if !current.can_transition_to(next) {
        return Err(ShopServerError::Conflict(format!(
            "Cannot change order status from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }
    Ok(())
}

/// Customers only see their own orders; staff see everything.
fn ensure_visible(order: &Order, principal: &Principal, caller: &ObjectId) -> Result<()> {
    if principal.is_admin() || &order.customer_id == caller {
        return Ok(());
    }
    Err(ShopServerError::not_found("Order"))
}

async fn find_order(state: &AppState, id: &ObjectId) -> Result<Order> {
    state
        .db
        .orders()
        .find_by_id(id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Order"))
}

/// An open refund request freezes the order until an admin decides it.
async fn ensure_no_open_refund(state: &AppState, order_id: &ObjectId) -> Result<()> {
    if state.db.refunds().find_open_for_order(order_id).await?.is_some() {
        return Err(ShopServerError::Conflict(
            "Order has an open refund request".to_string(),
        ));
    }
    Ok(())
}

/// Applies a checked transition; stock comes back only for the request
/// whose conditional write won.
async fn move_order(state: &AppState, order: &Order, next: OrderStatus) -> Result<()> {
    let id = order
        .id
        .ok_or_else(|| ShopServerError::Internal("order without id".to_string()))?;
    if !state.db.orders().set_status(&id, order.status, next).await? {
        return Err(ShopServerError::Conflict(
            "Order status changed concurrently, reload and retry".to_string(),
        ));
    }
    if next == OrderStatus::Cancelled {
        restock(state, &order.items).await?;
    }
    Ok(())
}

async fn restock(state: &AppState, lines: &[OrderLine]) -> Result<()> {
    let products = state.db.products();
    for line in lines {
        products.restock(&line.product_id, line.quantity).await?;
    }
    Ok(())
}

pub async fn checkout(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let req: CheckoutRequest = match &ctx.body {
        Some(_) => ctx.json()?,
        None => CheckoutRequest::default(),
    };

    let customer = state
        .db
        .customers()
        .find_by_id(&customer_id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Customer"))?;
    let shipping_address = req
        .shipping_address
        .or(customer.address)
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty())
        .ok_or_else(|| ShopServerError::Validation("Shipping address is required".to_string()))?;

    let cart = state.db.carts().find_for_customer(&customer_id).await?;
    if cart.is_empty() {
        return Err(ShopServerError::Validation("Cart is empty".to_string()));
    }

    let catalog = load_products(&state, cart.items.iter().map(|line| line.product_id)).await?;
    let mut lines = Vec::with_capacity(cart.items.len());
    for item in &cart.items {
        let product = catalog
            .get(&item.product_id)
            .ok_or_else(|| ShopServerError::not_found("Product"))?;
        lines.push(OrderLine {
            product_id: item.product_id,
            name: product.name.clone(),
            unit_price: product.price,
            quantity: item.quantity,
        });
    }

    let products = state.db.products();
    let mut reserved: Vec<OrderLine> = Vec::with_capacity(lines.len());
    for line in &lines {
        if !products.reserve_stock(&line.product_id, line.quantity).await? {
            restock(&state, &reserved).await?;
            return Err(ShopServerError::Conflict(format!(
                "Insufficient stock for '{}'",
                line.name
            )));
        }
        reserved.push(line.clone());
    }

    let mut order = Order::new(customer_id, lines, shipping_address);
    match state.db.orders().insert(&order).await {
        Ok(id) => order.id = Some(id),
        Err(err) => {
            restock(&state, &reserved).await?;
            return Err(err);
        }
    }
    state.db.carts().clear(&customer_id).await?;

    log::info!(
        "Order {} placed by {} (total {:.2})",
        order.order_number,
        customer_id,
        order.total
    );
    HandlerResponse::created(OrderView::from(order), "Order placed")
}

pub async fn get_my_orders(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let orders = state.db.orders().find_for_customer(&customer_id).await?;
    HandlerResponse::ok(views(orders), "Orders retrieved")
}

pub async fn get_order_by_id(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let caller = caller_id(&ctx)?;
    let order = find_order(&state, &id).await?;
    ensure_visible(&order, ctx.principal()?, &caller)?;
    HandlerResponse::ok(OrderView::from(order), "Order retrieved")
}

pub async fn get_all_orders(state: AppState, _ctx: HandlerContext) -> Result<HandlerResponse> {
    let orders = state.db.orders().find_recent().await?;
    HandlerResponse::ok(views(orders), "Orders retrieved")
}

pub async fn update_order_status(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let req: UpdateStatusRequest = ctx.json()?;
    let order = find_order(&state, &id).await?;
    check_transition(order.status, req.status)?;
    ensure_no_open_refund(&state, &id).await?;
    move_order(&state, &order, req.status).await?;

    log::info!(
        "Order {} moved from {} to {}",
        order.order_number,
        order.status.as_str(),
        req.status.as_str()
    );
    let order = find_order(&state, &id).await?;
    HandlerResponse::ok(OrderView::from(order), "Order status updated")
}

pub async fn cancel_order(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let customer_id = caller_id(&ctx)?;
    let order = find_order(&state, &id).await?;
    if order.customer_id != customer_id {
        return Err(ShopServerError::not_found("Order"));
    }
    if order.status != OrderStatus::Pending {
        return Err(ShopServerError::Conflict(
            "Only pending orders can be cancelled".to_string(),
        ));
    }

    ensure_no_open_refund(&state, &id).await?;
    move_order(&state, &order, OrderStatus::Cancelled).await?;

    log::info!("Order {} cancelled by customer", order.order_number);
    let order = find_order(&state, &id).await?;
    HandlerResponse::ok(OrderView::from(order), "Order cancelled")
}
