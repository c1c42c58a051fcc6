use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{caller_id, hex_id, id_param, parse_object_id, AppState};
use crate::{
    db::models::{round_currency, Review},
    dispatch::{HandlerContext, HandlerResponse},
    error::{Result, ShopServerError},
};

const ALREADY_REVIEWED: &str = "You have already reviewed this product";

#[derive(Debug, Serialize)]
pub struct ReviewView {
    pub id: String,
    pub product_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl From<Review> for ReviewView {
    fn from(review: Review) -> Self {
        Self {
            id: hex_id(&review.id),
            product_id: review.product_id.to_hex(),
            customer_id: review.customer_id.to_hex(),
            customer_name: review.customer_name,
            rating: review.rating,
            comment: review.comment,
            created_at: review.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductReviews {
    pub product_id: String,
    pub average_rating: Option<f64>,
    pub review_count: usize,
    pub reviews: Vec<ReviewView>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub product_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

/// Mean rating rounded to two decimals; `None` when there are no reviews.
pub fn average_rating(reviews: &[Review]) -> Option<f64> {
    if reviews.is_empty() {
        return None;
    }
    let sum: u32 = reviews.iter().map(|review| u32::from(review.rating)).sum();
    Some(round_currency(f64::from(sum) / reviews.len() as f64))
}

pub async fn get_product_reviews(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let product_id = id_param(&ctx, "id")?;
    state
        .db
        .products()
        .find_by_id(&product_id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Product"))?;

    let reviews = state.db.reviews().find_for_product(&product_id).await?;
    let summary = ProductReviews {
        product_id: product_id.to_hex(),
        average_rating: average_rating(&reviews),
        review_count: reviews.len(),
        reviews: reviews.into_iter().map(ReviewView::from).collect(),
    };
    HandlerResponse::ok(summary, "Reviews retrieved")
}

pub async fn create_review(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let customer_id = caller_id(&ctx)?;
    let req: CreateReviewRequest = ctx.json()?;
    if !Review::is_valid_rating(req.rating) {
        return Err(ShopServerError::Validation(format!(
            "Rating must be between {} and {}",
            Review::MIN_RATING,
            Review::MAX_RATING
        )));
    }
    let product_id = parse_object_id(&req.product_id)?;

    state
        .db
        .products()
        .find_by_id(&product_id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Product"))?;

    if !state
        .db
        .orders()
        .customer_has_purchased(&customer_id, &product_id)
        .await?
    {
        return Err(ShopServerError::Forbidden(
            "Only customers who bought this product can review it".to_string(),
        ));
    }

    let reviews = state.db.reviews();
    if reviews
        .find_by_author(&product_id, &customer_id)
        .await?
        .is_some()
    {
        return Err(ShopServerError::Conflict(ALREADY_REVIEWED.to_string()));
    }

    let customer_name = ctx
        .principal()?
        .claims
        .claim("name")
        .and_then(|name| name.as_str())
        .unwrap_or_default()
        .to_string();

    let mut review = Review {
        id: None,
        product_id,
        customer_id,
        customer_name,
        rating: req.rating,
        comment: req.comment.trim().to_string(),
        created_at: Utc::now(),
    };
    // A concurrent duplicate still trips the unique (product, customer) index.
    let id = reviews
        .insert(&review)
        .await
        .map_err(|err| err.duplicate_as_conflict(ALREADY_REVIEWED))?;
    review.id = Some(id);

    log::info!("Customer {} reviewed product {}", customer_id, product_id);
    HandlerResponse::created(ReviewView::from(review), "Review created")
}

pub async fn delete_review(state: AppState, ctx: HandlerContext) -> Result<HandlerResponse> {
    let id = id_param(&ctx, "id")?;
    let principal = ctx.principal()?;
    let caller = caller_id(&ctx)?;

    let reviews = state.db.reviews();
    let review = reviews
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ShopServerError::not_found("Review"))?;

    if !principal.is_admin() && review.customer_id != caller {
        return Err(ShopServerError::Forbidden(
            "You can only delete your own reviews".to_string(),
        ));
    }

    reviews.delete_by_id(&id).await?;
    log::info!("Review {} deleted by {}", id, principal.subject_id);
    Ok(HandlerResponse::message("Review deleted"))
}
