//! Sales reporting. Aggregation runs in-process over the loaded orders.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::AppState;
use crate::{
    db::models::{round_currency, Order},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
};

const DEFAULT_TOP_LIMIT: usize = 10;
const MAX_TOP_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesSummary {
    pub order_count: usize,
    pub revenue: f64,
    pub average_order_value: f64,
    pub orders_by_status: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSales {
    pub product_id: String,
    pub name: String,
    pub quantity_sold: i64,
    pub revenue: f64,
}

/// Revenue and averages count only orders that were not cancelled or refunded.
pub fn summarize_sales(orders: &[Order]) -> SalesSummary {
    let mut orders_by_status = BTreeMap::new();
    for order in orders {
        *orders_by_status.entry(order.status.as_str()).or_insert(0) += 1;
    }

    let counted: Vec<&Order> = orders
        .iter()
        .filter(|order| order.status.counts_as_revenue())
        .collect();
    let revenue = round_currency(counted.iter().map(|order| order.total).sum());
    let average_order_value = if counted.is_empty() {
        0.0
    } else {
        round_currency(revenue / counted.len() as f64)
    };

    SalesSummary {
        order_count: orders.len(),
        revenue,
        average_order_value,
        orders_by_status,
    }
}

/// Best sellers by quantity; ties break on revenue, then name.
pub fn rank_top_products(orders: &[Order], limit: usize) -> Vec<ProductSales> {
    let mut totals: HashMap<String, ProductSales> = HashMap::new();

    for order in orders.iter().filter(|order| order.status.counts_as_revenue()) {
        for line in &order.items {
            let entry = totals
                .entry(line.product_id.to_hex())
                .or_insert_with(|| ProductSales {
                    product_id: line.product_id.to_hex(),
                    name: line.name.clone(),
                    quantity_sold: 0,
                    revenue: 0.0,
                });
            entry.quantity_sold += line.quantity;
            entry.revenue = round_currency(entry.revenue + line.subtotal());
        }
    }

    let mut ranked: Vec<ProductSales> = totals.into_values().collect();
    ranked.sort_by(|a, b| {
        b.quantity_sold
            .cmp(&a.quantity_sold)
            .then_with(|| b.revenue.total_cmp(&a.revenue))
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.truncate(limit);
    ranked
}

pub fn parse_limit(raw: Option<&str>) -> Result<usize> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_TOP_LIMIT);
    };
    match raw.parse::<usize>() {
        Ok(limit) if (1..=MAX_TOP_LIMIT).contains(&limit) => Ok(limit),
        _ => Err(ShopServerError::Validation(format!(
            "Limit must be a number between 1 and {MAX_TOP_LIMIT}"
        ))),
    }
}

pub async fn sales_summary(state: AppState, _ctx: HandlerContext) -> Result<HandlerResponse> {
    let orders = state.db.orders().find_all().await?;
    HandlerResponse::ok(summarize_sales(&orders), "Sales summary")
}

pub async fn top_products(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let limit = parse_limit(ctx.params.get("limit"))?;
    let orders = state.db.orders().find_all().await?;
    HandlerResponse::ok(rank_top_products(&orders, limit), "Top products")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{OrderLine, OrderStatus};
    use mongodb::bson::oid::ObjectId;

    fn order(status: OrderStatus, lines: Vec<OrderLine>) -> Order {
        let mut order = Order::new(ObjectId::new(), lines, "1 Nursery Way".to_string());
        order.status = status;
        order
    }

    fn line(product_id: ObjectId, name: &str, price: f64, quantity: i64) -> OrderLine {
        OrderLine {
            product_id,
            name: name.to_string(),
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn summary_excludes_cancelled_and_refunded() {
        let cactus = ObjectId::new();
        let orders = vec![
            order(OrderStatus::Paid, vec![line(cactus, "Cactus", 10.0, 2)]),
            order(OrderStatus::Delivered, vec![line(cactus, "Cactus", 10.0, 4)]),
            order(OrderStatus::Cancelled, vec![line(cactus, "Cactus", 10.0, 9)]),
            order(OrderStatus::Refunded, vec![line(cactus, "Cactus", 10.0, 1)]),
        ];

        let summary = summarize_sales(&orders);
        assert_eq!(summary.order_count, 4);
        assert_eq!(summary.revenue, 60.0);
        assert_eq!(summary.average_order_value, 30.0);
        assert_eq!(summary.orders_by_status["paid"], 1);
        assert_eq!(summary.orders_by_status["cancelled"], 1);
        assert!(!summary.orders_by_status.contains_key("pending"));
    }

    #[test]
    fn summary_of_nothing() {
        let summary = summarize_sales(&[]);
        assert_eq!(summary.order_count, 0);
        assert_eq!(summary.revenue, 0.0);
        assert_eq!(summary.average_order_value, 0.0);
    }

    #[test]
    fn ranks_best_sellers() {
        let aloe = ObjectId::new();
        let ivy = ObjectId::new();
        let palm = ObjectId::new();
        let orders = vec![
            order(
                OrderStatus::Paid,
                vec![line(aloe, "Aloe", 6.0, 3), line(ivy, "Ivy", 9.0, 1)],
            ),
            order(OrderStatus::Shipped, vec![line(ivy, "Ivy", 9.0, 4)]),
            order(OrderStatus::Cancelled, vec![line(palm, "Palm", 40.0, 50)]),
        ];

        let ranked = rank_top_products(&orders, 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].name, "Ivy");
        assert_eq!(ranked[0].quantity_sold, 5);
        assert_eq!(ranked[0].revenue, 45.0);
        assert_eq!(ranked[1].name, "Aloe");

        assert_eq!(rank_top_products(&orders, 1).len(), 1);
    }

    #[test]
    fn limit_parsing() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_TOP_LIMIT);
        assert_eq!(parse_limit(Some("5")).unwrap(), 5);
        assert!(parse_limit(Some("0")).is_err());
        assert!(parse_limit(Some("101")).is_err());
        assert!(parse_limit(Some("ten")).is_err());
    }
}
