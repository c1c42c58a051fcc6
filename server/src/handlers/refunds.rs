use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};

use super::{caller_id, hex_id, id_param, parse_object_id, require_non_empty, AppState};
use crate::{
    db::models::{OrderStatus, Refund, RefundStatus},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
};

#[derive(Debug, Serialize)]
pub struct RefundView {
    pub id: String,
    pub order_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub reason: String,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<Refund> for RefundView {
    fn from(refund: Refund) -> Self {
        Self {
            id: hex_id(&refund.id),
            order_id: refund.order_id.to_hex(),
            customer_id: refund.customer_id.to_hex(),
            amount: refund.amount,
            reason: refund.reason,
            status: refund.status,
            created_at: refund.created_at,
            resolved_at: refund.resolved_at,
        }
    }
}

fn views(refunds: Vec<Refund>) -> Vec<RefundView> {
    refunds.into_iter().map(RefundView::from).collect()
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub order_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRefundRequest {
    pub status: RefundStatus,
}

/// Only pending requests can be decided, and only to a final state.
pub fn check_resolution(current: RefundStatus, next: RefundStatus) -> Result<()> {
    if current != RefundStatus::Requested {
        return Err(ShopServerError::Conflict(format!(
            "Refund is already {}",
            current.as_str()
        )));
    }
    if next == RefundStatus::Requested {
        return Err(ShopServerError::Validation(
            "Refund status must be approved or rejected".to_string(),
        ));
    }
    Ok(())
}

/// Approval moves the order to `refunded`, so the order must still be in a
/// refundable state when the admin decides.
pub fn check_refund_approval(order_status: OrderStatus) -> Result<()> {
    if !order_status.is_refundable() {
        return Err(ShopServerError::Conflict(format!(
            "Order is {} and can no longer be refunded",
            order_status.as_str()
        )));
    }
    Ok(())
}

pub async fn request_refund(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let req: RefundRequest = ctx.json()?;
    require_non_empty("reason", &req.reason)?;
    let order_id = parse_object_id(&req.order_id)?;

    let order = state
        .db
        .orders()
        .find_by_id(&order_id)
        .await?
        .filter(|order| order.customer_id == customer_id)
        .ok_or_else(|| ShopServerError::not_found("Order"))?;

    if !order.status.is_refundable() {
        return Err(ShopServerError::Conflict(format!(
            "Orders that are {} cannot be refunded",
            order.status.as_str()
        )));
    }

    let refunds = state.db.refunds();
    if refunds.find_open_for_order(&order_id).await?.is_some() {
        return Err(ShopServerError::Conflict(
            "A refund for this order is already open".to_string(),
        ));
    }

    let mut refund = Refund {
        id: None,
        order_id,
        customer_id,
        amount: order.total,
        reason: req.reason.trim().to_string(),
        status: RefundStatus::Requested,
        created_at: Utc::now(),
        resolved_at: None,
    };
    refund.id = Some(refunds.insert(&refund).await?);

    log::info!("Refund requested for order {}", order.order_number);
    HandlerResponse::created(RefundView::from(refund), "Refund requested")
}

pub async fn get_my_refunds(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let refunds = state.db.refunds().find_for_customer(&customer_id).await?;
    HandlerResponse::ok(views(refunds), "Refunds retrieved")
}

pub async fn get_all_refunds(state: AppState, _ctx: HandlerContext) -> Result<HandlerResponse> {
    let refunds = state
        .db
        .refunds()
        .find_sorted(doc! {}, doc! { "created_at": -1 })
        .await?;
    HandlerResponse::ok(views(refunds), "Refunds retrieved")
}

pub async fn update_refund_status(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let req: ResolveRefundRequest = ctx.json()?;

    let refunds = state.db.refunds();
    let refund = refunds
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Refund"))?;
    check_resolution(refund.status, req.status)?;

    let orders = state.db.orders();
    let order = if req.status == RefundStatus::Approved {
        let order = orders
            .find_by_id(&refund.order_id)
            .await?
            .ok_or_else(|| ShopServerError::not_found("Order"))?;
        check_refund_approval(order.status)?;
        Some(order)
    } else {
        None
    };

    if !refunds.resolve(&id, req.status).await? {
        return Err(ShopServerError::Conflict(
            "Refund was already decided".to_string(),
        ));
    }
    if let Some(order) = order {
        if !orders
            .set_status(&refund.order_id, order.status, OrderStatus::Refunded)
            .await?
        {
            log::error!(
                "Refund {} approved but order {} left {}",
                id,
                order.order_number,
                order.status.as_str()
            );
            return Err(ShopServerError::Conflict(
                "Order status changed while the refund was decided".to_string(),
            ));
        }
    }

    log::info!(
        "Refund {} for order {} {}",
        id,
        refund.order_id,
        req.status.as_str()
    );
    let refund = refunds
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Refund"))?;
    HandlerResponse::ok(RefundView::from(refund), "Refund updated")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_requested_refunds_resolve() {
        assert!(check_resolution(RefundStatus::Requested, RefundStatus::Approved).is_ok());
        assert!(check_resolution(RefundStatus::Requested, RefundStatus::Rejected).is_ok());
        assert!(matches!(
            check_resolution(RefundStatus::Approved, RefundStatus::Rejected),
            Err(ShopServerError::Conflict(_))
        ));
        assert!(matches!(
            check_resolution(RefundStatus::Requested, RefundStatus::Requested),
            Err(ShopServerError::Validation(_))
        ));
    }

    #[test]
    fn approval_needs_a_refundable_order() {
        for status in [OrderStatus::Paid, OrderStatus::Shipped, OrderStatus::Delivered] {
            assert!(check_refund_approval(status).is_ok());
        }
        for status in [OrderStatus::Pending, OrderStatus::Cancelled, OrderStatus::Refunded] {
            assert!(matches!(
                check_refund_approval(status),
                Err(ShopServerError::Conflict(_))
            ));
        }
    }
}
