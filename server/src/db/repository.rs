use chrono::{SecondsFormat, Utc};
use futures_util::stream::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::{IndexOptions, ReturnDocument},
    Client, Collection, Database, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};

use super::models::{
    Cart, CartLine, Category, Customer, Employee, Order, OrderStatus, Product, Refund,
    RefundStatus, Review,
};
use crate::error::{Result, ShopServerError};

#[derive(Clone)]
pub struct MongoDbContext {
    db: Database,
}

impl MongoDbContext {
    pub fn new(client: Client, database_name: &str) -> Self {
        Self {
            db: client.database(database_name),
        }
    }

    fn repository<T: Send + Sync>(&self, name: &str) -> Repository<T> {
        Repository {
            collection: self.db.collection(name),
        }
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository(self.repository("customers"))
    }

    pub fn employees(&self) -> EmployeeRepository {
        EmployeeRepository(self.repository("employees"))
    }

    pub fn categories(&self) -> Repository<Category> {
        self.repository("categories")
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository(self.repository("products"))
    }

    pub fn carts(&self) -> CartRepository {
        CartRepository(self.repository("carts"))
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository(self.repository("orders"))
    }

    pub fn reviews(&self) -> ReviewRepository {
        ReviewRepository(self.repository("reviews"))
    }

    pub fn refunds(&self) -> RefundRepository {
        RefundRepository(self.repository("refunds"))
    }

    pub async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    pub async fn init_indexes(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.db
            .collection::<Customer>("customers")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;

        self.db
            .collection::<Employee>("employees")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;

        self.db
            .collection::<Category>("categories")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;

        self.db
            .collection::<Product>("products")
            .create_index(IndexModel::builder().keys(doc! { "category_id": 1 }).build())
            .await?;

        self.db
            .collection::<Cart>("carts")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "customer_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;

        self.db
            .collection::<Order>("orders")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "customer_id": 1, "created_at": -1 })
                    .build(),
            )
            .await?;

        // One review per customer per product
        self.db
            .collection::<Review>("reviews")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "product_id": 1, "customer_id": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;

        self.db
            .collection::<Refund>("refunds")
            .create_index(IndexModel::builder().keys(doc! { "order_id": 1 }).build())
            .await?;

        log::info!("Database indexes created successfully");
        Ok(())
    }
}

/// Typed CRUD over a single collection.
#[derive(Clone)]
pub struct Repository<T: Send + Sync> {
    collection: Collection<T>,
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    pub async fn find_all(&self) -> Result<Vec<T>> {
        self.find_many(doc! {}).await
    }

    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>> {
        let cursor = self.collection.find(filter).await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn find_sorted(&self, filter: Document, sort: Document) -> Result<Vec<T>> {
        let cursor = self.collection.find(filter).sort(sort).await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        Ok(self.collection.find_one(filter).await?)
    }

    pub async fn find_by_id(&self, id: &ObjectId) -> Result<Option<T>> {
        self.find_one(doc! { "_id": id }).await
    }

    pub async fn insert(&self, item: &T) -> Result<ObjectId> {
        let result = self.collection.insert_one(item).await?;
        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| ShopServerError::Internal("inserted id is not an ObjectId".to_string()))
    }

    /// Applies `$set` to one document. Returns whether it existed.
    pub async fn update_by_id(&self, id: &ObjectId, changes: Document) -> Result<bool> {
        let result = self
            .collection
            .update_one(doc! { "_id": id }, doc! { "$set": changes })
            .await?;
        Ok(result.matched_count == 1)
    }

    pub async fn delete_by_id(&self, id: &ObjectId) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count == 1)
    }

    pub async fn count(&self, filter: Document) -> Result<u64> {
        Ok(self.collection.count_documents(filter).await?)
    }
}

/// Entity repositories add queries on top of [`Repository`] and deref to it.
macro_rules! entity_repository {
    ($name:ident, $entity:ty) => {
        #[derive(Clone)]
        pub struct $name(Repository<$entity>);

        impl std::ops::Deref for $name {
            type Target = Repository<$entity>;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

entity_repository!(CustomerRepository, Customer);
entity_repository!(EmployeeRepository, Employee);
entity_repository!(ProductRepository, Product);
entity_repository!(CartRepository, Cart);
entity_repository!(OrderRepository, Order);
entity_repository!(ReviewRepository, Review);
entity_repository!(RefundRepository, Refund);

/// Current time in the same RFC 3339 form chrono's serde impl writes.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl CustomerRepository {
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Customer>> {
        self.find_one(doc! { "email": email }).await
    }

    pub async fn update_last_login(&self, id: &ObjectId) -> Result<()> {
        self.update_by_id(id, doc! { "last_login": timestamp() })
            .await?;
        Ok(())
    }
}

impl EmployeeRepository {
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Employee>> {
        self.find_one(doc! { "email": email }).await
    }

    pub async fn update_last_login(&self, id: &ObjectId) -> Result<()> {
        self.update_by_id(id, doc! { "last_login": timestamp() })
            .await?;
        Ok(())
    }
}

/// Escapes regex metacharacters so user input matches literally.
pub fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl ProductRepository {
    pub async fn find_by_category(&self, category_id: &ObjectId) -> Result<Vec<Product>> {
        self.find_sorted(doc! { "category_id": category_id }, doc! { "name": 1 })
            .await
    }

    pub async fn search_by_name(&self, query: &str) -> Result<Vec<Product>> {
        self.find_sorted(
            doc! { "name": { "$regex": escape_regex(query), "$options": "i" } },
            doc! { "name": 1 },
        )
        .await
    }

    pub async fn count_in_category(&self, category_id: &ObjectId) -> Result<u64> {
        self.count(doc! { "category_id": category_id }).await
    }

    /// Removes `quantity` units only if that many are in stock.
    pub async fn reserve_stock(&self, id: &ObjectId, quantity: i64) -> Result<bool> {
        let result = self
            .0
            .collection
            .update_one(
                doc! { "_id": id, "stock": { "$gte": quantity } },
                doc! {
                    "$inc": { "stock": -quantity },
                    "$set": { "updated_at": timestamp() },
                },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    pub async fn restock(&self, id: &ObjectId, quantity: i64) -> Result<()> {
        self.0
            .collection
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$inc": { "stock": quantity },
                    "$set": { "updated_at": timestamp() },
                },
            )
            .await?;
        Ok(())
    }
}

impl CartRepository {
    pub async fn find_for_customer(&self, customer_id: &ObjectId) -> Result<Cart> {
        Ok(self
            .find_one(doc! { "customer_id": customer_id })
            .await?
            .unwrap_or_else(|| Cart::empty(*customer_id)))
    }

    pub async fn save_items(&self, customer_id: &ObjectId, items: &[CartLine]) -> Result<Cart> {
        let lines = items
            .iter()
            .map(|line| doc! { "product_id": line.product_id, "quantity": line.quantity })
            .collect::<Vec<_>>();

        let cart = self
            .0
            .collection
            .find_one_and_update(
                doc! { "customer_id": customer_id },
                doc! { "$set": { "items": lines, "updated_at": timestamp() } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?;

        cart.ok_or_else(|| ShopServerError::Internal("cart upsert returned nothing".to_string()))
    }

    pub async fn clear(&self, customer_id: &ObjectId) -> Result<()> {
        self.save_items(customer_id, &[]).await?;
        Ok(())
    }

    /// Drops the cart document itself, for accounts that are going away.
    pub async fn delete_for_customer(&self, customer_id: &ObjectId) -> Result<bool> {
        let result = self
            .0
            .collection
            .delete_one(doc! { "customer_id": customer_id })
            .await?;
        Ok(result.deleted_count == 1)
    }
}

impl OrderRepository {
    pub async fn find_for_customer(&self, customer_id: &ObjectId) -> Result<Vec<Order>> {
        self.find_sorted(
            doc! { "customer_id": customer_id },
            doc! { "created_at": -1 },
        )
        .await
    }

    pub async fn find_recent(&self) -> Result<Vec<Order>> {
        self.find_sorted(doc! {}, doc! { "created_at": -1 }).await
    }

    /// Moves the order only if it is still in `from`; false when another
    /// request changed it first.
    pub async fn set_status(
        &self,
        id: &ObjectId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let result = self
            .0
            .collection
            .update_one(
                doc! { "_id": id, "status": from.as_str() },
                doc! { "$set": { "status": to.as_str(), "updated_at": timestamp() } },
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    pub async fn customer_has_purchased(
        &self,
        customer_id: &ObjectId,
        product_id: &ObjectId,
    ) -> Result<bool> {
        let count = self
            .count(doc! {
                "customer_id": customer_id,
                "items.product_id": product_id,
                "status": { "$in": ["paid", "shipped", "delivered"] },
            })
            .await?;
        Ok(count > 0)
    }
}

impl ReviewRepository {
    pub async fn find_for_product(&self, product_id: &ObjectId) -> Result<Vec<Review>> {
        self.find_sorted(doc! { "product_id": product_id }, doc! { "created_at": -1 })
            .await
    }

    pub async fn find_by_author(
        &self,
        product_id: &ObjectId,
        customer_id: &ObjectId,
    ) -> Result<Option<Review>> {
        self.find_one(doc! { "product_id": product_id, "customer_id": customer_id })
            .await
    }
}

impl RefundRepository {
    pub async fn find_for_customer(&self, customer_id: &ObjectId) -> Result<Vec<Refund>> {
        self.find_sorted(
            doc! { "customer_id": customer_id },
            doc! { "created_at": -1 },
        )
        .await
    }

    /// A requested or approved refund blocks another request on the same order.
    pub async fn find_open_for_order(&self, order_id: &ObjectId) -> Result<Option<Refund>> {
        self.find_one(doc! {
            "order_id": order_id,
            "status": { "$in": [RefundStatus::Requested.as_str(), RefundStatus::Approved.as_str()] },
        })
        .await
    }

    /// Decides a refund that is still requested; false when it was already decided.
    pub async fn resolve(&self, id: &ObjectId, status: RefundStatus) -> Result<bool> {
        let result = self
            .0
            .collection
            .update_one(
                doc! { "_id": id, "status": RefundStatus::Requested.as_str() },
                doc! { "$set": { "status": status.as_str(), "resolved_at": timestamp() } },
            )
            .await?;
        Ok(result.matched_count == 1)
    }
}
