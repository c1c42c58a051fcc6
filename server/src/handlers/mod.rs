//! Controllers behind the `Controller@method` handler references of the
//! route table.

pub mod auth;
pub mod cart;
pub mod categories;
pub mod customers;
pub mod employees;
pub mod health;
pub mod orders;
pub mod products;
pub mod refunds;
pub mod reports;
pub mod reviews;

use std::future::Future;

use mongodb::bson::oid::ObjectId;

use crate::auth_token::TokenCodec;
use crate::db::MongoDbContext;
use crate::dispatch::{HandlerContext, HandlerRegistry, HandlerResponse};
use crate::error::{Result, ShopServerError};
use crate::routing::RouteConfigError;

/// Everything a controller needs besides the request itself.
#[derive(Clone)]
pub struct AppState {
    pub db: MongoDbContext,
    pub tokens: TokenCodec,
}

impl AppState {
    pub fn new(db: MongoDbContext, tokens: TokenCodec) -> Self {
        Self { db, tokens }
    }
}

fn bind<F, Fut>(
    state: &AppState,
    handler: F,
) -> impl Fn(HandlerContext) -> Fut + Send + Sync + 'static
where
    F: Fn(AppState, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerResponse>> + Send + 'static,
{
    let state = state.clone();
    move |ctx| handler(state.clone(), ctx)
}

/// Registers every controller method. The route table is validated against
/// this registry when the dispatcher is built.
pub fn build_registry(state: &AppState) -> std::result::Result<HandlerRegistry, RouteConfigError> {
    let mut registry = HandlerRegistry::new();

    registry.register("HealthController@check", health::check)?;

    registry.register("AuthController@registerCustomer", bind(state, auth::register_customer))?;
    registry.register("AuthController@loginCustomer", bind(state, auth::login_customer))?;
    registry.register("AuthController@loginEmployee", bind(state, auth::login_employee))?;
    registry.register("AuthController@logout", auth::logout)?;
    registry.register("AuthController@me", auth::me)?;

    registry.register("ProductsController@getAllProducts", bind(state, products::get_all_products))?;
    registry.register("ProductsController@getProductByID", bind(state, products::get_product_by_id))?;
    registry.register(
        "ProductsController@getProductsByCategory",
        bind(state, products::get_products_by_category),
    )?;
    registry.register("ProductsController@searchProducts", bind(state, products::search_products))?;
    registry.register("ProductsController@createProduct", bind(state, products::create_product))?;
    registry.register("ProductsController@updateProduct", bind(state, products::update_product))?;
    registry.register("ProductsController@deleteProduct", bind(state, products::delete_product))?;

    registry.register(
        "CategoriesController@getAllCategories",
        bind(state, categories::get_all_categories),
    )?;
    registry.register(
        "CategoriesController@getCategoryByID",
        bind(state, categories::get_category_by_id),
    )?;
    registry.register("CategoriesController@createCategory", bind(state, categories::create_category))?;
    registry.register("CategoriesController@updateCategory", bind(state, categories::update_category))?;
    registry.register("CategoriesController@deleteCategory", bind(state, categories::delete_category))?;

    registry.register("CartController@getCart", bind(state, cart::get_cart))?;
    registry.register("CartController@addItem", bind(state, cart::add_item))?;
    registry.register("CartController@updateItem", bind(state, cart::update_item))?;
    registry.register("CartController@removeItem", bind(state, cart::remove_item))?;
    registry.register("CartController@clearCart", bind(state, cart::clear_cart))?;

    registry.register("OrdersController@checkout", bind(state, orders::checkout))?;
    registry.register("OrdersController@getMyOrders", bind(state, orders::get_my_orders))?;
    registry.register("OrdersController@getOrderByID", bind(state, orders::get_order_by_id))?;
    registry.register("OrdersController@getAllOrders", bind(state, orders::get_all_orders))?;
    registry.register("OrdersController@updateOrderStatus", bind(state, orders::update_order_status))?;
    registry.register("OrdersController@cancelOrder", bind(state, orders::cancel_order))?;

    registry.register("CustomersController@getAllCustomers", bind(state, customers::get_all_customers))?;
    registry.register("CustomersController@getCustomerByID", bind(state, customers::get_customer_by_id))?;
    registry.register("CustomersController@deleteCustomer", bind(state, customers::delete_customer))?;
    registry.register("CustomersController@getProfile", bind(state, customers::get_profile))?;
    registry.register("CustomersController@updateProfile", bind(state, customers::update_profile))?;

    registry.register("EmployeesController@getAllEmployees", bind(state, employees::get_all_employees))?;
    registry.register("EmployeesController@createEmployee", bind(state, employees::create_employee))?;
    registry.register("EmployeesController@deleteEmployee", bind(state, employees::delete_employee))?;

    registry.register("ReviewsController@getProductReviews", bind(state, reviews::get_product_reviews))?;
    registry.register("ReviewsController@createReview", bind(state, reviews::create_review))?;
    registry.register("ReviewsController@deleteReview", bind(state, reviews::delete_review))?;

    registry.register("RefundsController@requestRefund", bind(state, refunds::request_refund))?;
    registry.register("RefundsController@getMyRefunds", bind(state, refunds::get_my_refunds))?;
    registry.register("RefundsController@getAllRefunds", bind(state, refunds::get_all_refunds))?;
    registry.register(
        "RefundsController@updateRefundStatus",
        bind(state, refunds::update_refund_status),
    )?;

    registry.register("ReportsController@salesSummary", bind(state, reports::sales_summary))?;
    registry.register("ReportsController@topProducts", bind(state, reports::top_products))?;

    Ok(registry)
}

pub(crate) fn parse_object_id(raw: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw).map_err(|_| ShopServerError::InvalidId(raw.to_string()))
}

/// Parses the `:name` path parameter as an ObjectId.
pub(crate) fn id_param(ctx: &HandlerContext, name: &str) -> Result<ObjectId> {
    parse_object_id(ctx.param(name)?)
}

/// The ObjectId of the signed-in customer or employee.
pub(crate) fn caller_id(ctx: &HandlerContext) -> Result<ObjectId> {
    let principal = ctx.principal()?;
    ObjectId::parse_str(&principal.subject_id).map_err(|_| ShopServerError::Unauthorized)
}

pub(crate) fn hex_id(id: &Option<ObjectId>) -> String {
    id.map(|id| id.to_hex()).unwrap_or_default()
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ShopServerError::Validation(format!("{field} is required")));
    }
    Ok(())
}
