use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{
        CreateCustomOrderRequest, CustomOrder, CustomOrderStatus, DashboardStats, Order,
        OrderStatus, Product, ProductInput, ProfileUpsert, UserProfile,
    },
};

/// How many orders the dashboard shows.
pub const RECENT_ORDER_LIMIT: i64 = 5;

/// Catalog listing order. The storefront shows the oldest pieces first, the back office
/// the newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductOrder {
    OldestFirst,
    NewestFirst,
}

/// Repository Trait
///
/// Abstract contract for the profile store and the shop tables. Handlers and the role
/// resolver only ever see `Arc<dyn Repository>`, so the hosted Postgres and the in-memory
/// store are interchangeable.
///
/// Every method reports failures as `StoreError`; deciding what a failure *means*
/// (deny, 500, empty list) is left to the caller.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Profiles ---
    async fn find_profile_by_user_id(&self, user_id: Uuid)
    -> Result<Option<UserProfile>, StoreError>;
    // Insert-or-update keyed on user_id.
    async fn upsert_profile(&self, profile: ProfileUpsert) -> Result<UserProfile, StoreError>;

    // --- Catalog ---
    async fn list_products(&self, order: ProductOrder) -> Result<Vec<Product>, StoreError>;
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn create_product(&self, input: ProductInput) -> Result<Product, StoreError>;
    // Full replacement of the editable fields. None when the product does not exist.
    async fn update_product(
        &self,
        id: Uuid,
        input: ProductInput,
    ) -> Result<Option<Product>, StoreError>;
    async fn delete_product(&self, id: Uuid) -> Result<bool, StoreError>;

    // --- Orders ---
    // Newest first, product names joined in.
    async fn list_orders(&self) -> Result<Vec<Order>, StoreError>;
    async fn recent_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError>;
    async fn orders_for_email(&self, email: &str) -> Result<Vec<Order>, StoreError>;
    async fn set_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError>;

    // --- Custom orders ---
    async fn create_custom_order(
        &self,
        req: CreateCustomOrderRequest,
    ) -> Result<CustomOrder, StoreError>;
    async fn list_custom_orders(&self) -> Result<Vec<CustomOrder>, StoreError>;
    async fn custom_orders_for_email(&self, email: &str) -> Result<Vec<CustomOrder>, StoreError>;
    async fn set_custom_order_status(
        &self,
        id: Uuid,
        status: CustomOrderStatus,
    ) -> Result<Option<CustomOrder>, StoreError>;
    async fn delete_custom_order(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Counters plus the most recent orders for the admin landing page.
    async fn dashboard_stats(&self) -> Result<DashboardStats, StoreError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const PROFILE_COLUMNS: &str =
    "id, user_id, email, first_name, last_name, phone, role, created_at, updated_at";

// Money columns are numeric in the hosted schema; read them back as float8.
const PRODUCT_COLUMNS: &str =
    "id, created_at, name, description, price::float8 AS price, images, material";

const CUSTOM_ORDER_COLUMNS: &str = "id, customer_name, customer_email, customer_phone, description, \
     budget::float8 AS budget, notes, images, status, created_at";

const ORDER_SELECT: &str = "SELECT o.id, o.product_id, o.customer_name, o.customer_email, \
     o.customer_phone, o.quantity, o.total_amount::float8 AS total_amount, o.status, o.notes, \
     o.created_at, p.name AS product_name \
     FROM orders o LEFT JOIN products p ON p.id = o.product_id";

/// PostgresRepository
///
/// `Repository` backed by the project's Postgres database. Queries are built at runtime
/// (`query_as` + `bind`) so the crate compiles without a live database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_profile_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserProfile>, StoreError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = $1");
        let profile = sqlx::query_as::<_, UserProfile>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    /// upsert_profile
    ///
    /// `ON CONFLICT (user_id)` keeps the one-profile-per-identity invariant even when a
    /// sign-up is retried.
    async fn upsert_profile(&self, profile: ProfileUpsert) -> Result<UserProfile, StoreError> {
        let sql = format!(
            "INSERT INTO user_profiles (user_id, email, first_name, last_name, phone, role) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id) DO UPDATE SET \
                email = EXCLUDED.email, first_name = EXCLUDED.first_name, \
                last_name = EXCLUDED.last_name, phone = EXCLUDED.phone, \
                role = EXCLUDED.role, updated_at = NOW() \
             RETURNING {PROFILE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserProfile>(&sql)
            .bind(profile.user_id)
            .bind(profile.email)
            .bind(profile.first_name)
            .bind(profile.last_name)
            .bind(profile.phone)
            .bind(profile.role.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_products(&self, order: ProductOrder) -> Result<Vec<Product>, StoreError> {
        let direction = match order {
            ProductOrder::OldestFirst => "ASC",
            ProductOrder::NewestFirst => "DESC",
        };
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at {direction}");
        Ok(sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_product(&self, input: ProductInput) -> Result<Product, StoreError> {
        let sql = format!(
            "INSERT INTO products (name, description, price, material, images) \
             VALUES ($1, $2, $3::numeric, $4, $5) RETURNING {PRODUCT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(input.name)
            .bind(input.description)
            .bind(input.price)
            .bind(input.material)
            .bind(input.images)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_product(
        &self,
        id: Uuid,
        input: ProductInput,
    ) -> Result<Option<Product>, StoreError> {
        let sql = format!(
            "UPDATE products SET name = $2, description = $3, price = $4::numeric, \
             material = $5, images = $6 WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .bind(input.name)
            .bind(input.description)
            .bind(input.price)
            .bind(input.material)
            .bind(input.images)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let sql = format!("{ORDER_SELECT} ORDER BY o.created_at DESC");
        Ok(sqlx::query_as::<_, Order>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn recent_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let sql = format!("{ORDER_SELECT} ORDER BY o.created_at DESC LIMIT $1");
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn orders_for_email(&self, email: &str) -> Result<Vec<Order>, StoreError> {
        let sql = format!("{ORDER_SELECT} WHERE o.customer_email = $1 ORDER BY o.created_at DESC");
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(email)
            .fetch_all(&self.pool)
            .await?)
    }

    /// set_order_status
    ///
    /// Updates inside a CTE so the returned row still carries the joined product name.
    async fn set_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let sql = "WITH updated AS (UPDATE orders SET status = $2 WHERE id = $1 RETURNING *) \
             SELECT o.id, o.product_id, o.customer_name, o.customer_email, o.customer_phone, \
             o.quantity, o.total_amount::float8 AS total_amount, o.status, o.notes, o.created_at, \
             p.name AS product_name \
             FROM updated o LEFT JOIN products p ON p.id = o.product_id";
        Ok(sqlx::query_as::<_, Order>(sql)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_custom_order(
        &self,
        req: CreateCustomOrderRequest,
    ) -> Result<CustomOrder, StoreError> {
        let sql = format!(
            "INSERT INTO custom_orders \
                (customer_name, customer_email, customer_phone, description, budget, notes, images, status) \
             VALUES ($1, $2, $3, $4, $5::numeric, $6, $7, 'pending') \
             RETURNING {CUSTOM_ORDER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, CustomOrder>(&sql)
            .bind(req.customer_name)
            .bind(req.customer_email)
            .bind(req.customer_phone)
            .bind(req.description)
            .bind(req.budget)
            .bind(req.notes)
            .bind(req.images)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_custom_orders(&self) -> Result<Vec<CustomOrder>, StoreError> {
        let sql =
            format!("SELECT {CUSTOM_ORDER_COLUMNS} FROM custom_orders ORDER BY created_at DESC");
        Ok(sqlx::query_as::<_, CustomOrder>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn custom_orders_for_email(&self, email: &str) -> Result<Vec<CustomOrder>, StoreError> {
        let sql = format!(
            "SELECT {CUSTOM_ORDER_COLUMNS} FROM custom_orders \
             WHERE customer_email = $1 ORDER BY created_at DESC"
        );
        Ok(sqlx::query_as::<_, CustomOrder>(&sql)
            .bind(email)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn set_custom_order_status(
        &self,
        id: Uuid,
        status: CustomOrderStatus,
    ) -> Result<Option<CustomOrder>, StoreError> {
        let sql = format!(
            "UPDATE custom_orders SET status = $2 WHERE id = $1 RETURNING {CUSTOM_ORDER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, CustomOrder>(&sql)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_custom_order(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM custom_orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, StoreError> {
        let total_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        let total_orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        let total_custom_orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM custom_orders")
            .fetch_one(&self.pool)
            .await?;
        let recent_orders = self.recent_orders(RECENT_ORDER_LIMIT).await?;

        Ok(DashboardStats {
            total_products,
            total_orders,
            total_custom_orders,
            recent_orders,
        })
    }
}

// --- In-memory store ---

#[derive(Default)]
struct MemoryTables {
    profiles: Vec<UserProfile>,
    products: Vec<Product>,
    orders: Vec<Order>,
    custom_orders: Vec<CustomOrder>,
}

impl MemoryTables {
    fn with_product_name(&self, mut order: Order) -> Order {
        order.product_name = order
            .product_id
            .and_then(|pid| self.products.iter().find(|p| p.id == pid))
            .map(|p| p.name.clone());
        order
    }

    fn orders_newest_first(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .cloned()
            .map(|o| self.with_product_name(o))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }
}

/// MemoryRepository
///
/// Process-local `Repository` used by the test suite and for demos without a database.
/// Profile reads and writes can be switched to fail, to exercise the deny-on-error paths.
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<MemoryTables>,
    fail_profile_reads: AtomicBool,
    fail_profile_writes: AtomicBool,
    profile_reads: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_profile_reads(&self, fail: bool) {
        self.fail_profile_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_profile_writes(&self, fail: bool) {
        self.fail_profile_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of profile lookups served so far.
    pub fn profile_reads(&self) -> usize {
        self.profile_reads.load(Ordering::SeqCst)
    }

    pub async fn profile_count(&self) -> usize {
        self.tables.read().await.profiles.len()
    }

    /// Seeds an order row directly; orders are created outside this application.
    pub async fn insert_order(&self, order: Order) {
        self.tables.write().await.orders.push(order);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_profile_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserProfile>, StoreError> {
        self.profile_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_profile_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("profile reads disabled".to_string()));
        }
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn upsert_profile(&self, profile: ProfileUpsert) -> Result<UserProfile, StoreError> {
        if self.fail_profile_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("profile writes disabled".to_string()));
        }
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        if let Some(existing) = tables
            .profiles
            .iter_mut()
            .find(|p| p.user_id == profile.user_id)
        {
            existing.email = profile.email;
            existing.first_name = profile.first_name;
            existing.last_name = profile.last_name;
            existing.phone = profile.phone;
            existing.role = profile.role;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let row = UserProfile {
            id: Uuid::new_v4(),
            user_id: profile.user_id,
            email: profile.email,
            first_name: profile.first_name,
            last_name: profile.last_name,
            phone: profile.phone,
            role: profile.role,
            created_at: now,
            updated_at: now,
        };
        tables.profiles.push(row.clone());
        Ok(row)
    }

    async fn list_products(&self, order: ProductOrder) -> Result<Vec<Product>, StoreError> {
        let mut products = self.tables.read().await.products.clone();
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if order == ProductOrder::NewestFirst {
            products.reverse();
        }
        Ok(products)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.products.iter().find(|p| p.id == id).cloned())
    }

    async fn create_product(&self, input: ProductInput) -> Result<Product, StoreError> {
        let product = Product {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            name: input.name,
            description: input.description,
            price: input.price,
            images: input.images,
            material: input.material,
        };
        self.tables.write().await.products.push(product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        id: Uuid,
        input: ProductInput,
    ) -> Result<Option<Product>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.products.iter_mut().find(|p| p.id == id).map(|p| {
            p.name = input.name;
            p.description = input.description;
            p.price = input.price;
            p.material = input.material;
            p.images = input.images;
            p.clone()
        }))
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.products.len();
        tables.products.retain(|p| p.id != id);
        Ok(tables.products.len() < before)
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        Ok(self.tables.read().await.orders_newest_first())
    }

    async fn recent_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let mut orders = self.tables.read().await.orders_newest_first();
        orders.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(orders)
    }

    async fn orders_for_email(&self, email: &str) -> Result<Vec<Order>, StoreError> {
        let mut orders = self.tables.read().await.orders_newest_first();
        orders.retain(|o| o.customer_email == email);
        Ok(orders)
    }

    async fn set_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut tables = self.tables.write().await;
        let updated = tables.orders.iter_mut().find(|o| o.id == id).map(|o| {
            o.status = status;
            o.clone()
        });
        Ok(updated.map(|o| tables.with_product_name(o)))
    }

    async fn create_custom_order(
        &self,
        req: CreateCustomOrderRequest,
    ) -> Result<CustomOrder, StoreError> {
        let order = CustomOrder {
            id: Uuid::new_v4(),
            customer_name: req.customer_name,
            customer_email: req.customer_email,
            customer_phone: req.customer_phone,
            description: req.description,
            budget: req.budget,
            notes: req.notes,
            images: req.images,
            status: CustomOrderStatus::Pending,
            created_at: Utc::now(),
        };
        self.tables.write().await.custom_orders.push(order.clone());
        Ok(order)
    }

    async fn list_custom_orders(&self) -> Result<Vec<CustomOrder>, StoreError> {
        let mut orders = self.tables.read().await.custom_orders.clone();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn custom_orders_for_email(&self, email: &str) -> Result<Vec<CustomOrder>, StoreError> {
        let mut orders = self.list_custom_orders().await?;
        orders.retain(|o| o.customer_email == email);
        Ok(orders)
    }

    async fn set_custom_order_status(
        &self,
        id: Uuid,
        status: CustomOrderStatus,
    ) -> Result<Option<CustomOrder>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.custom_orders.iter_mut().find(|o| o.id == id).map(|o| {
            o.status = status;
            o.clone()
        }))
    }

    async fn delete_custom_order(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.custom_orders.len();
        tables.custom_orders.retain(|o| o.id != id);
        Ok(tables.custom_orders.len() < before)
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, StoreError> {
        let recent_orders = self.recent_orders(RECENT_ORDER_LIMIT).await?;
        let tables = self.tables.read().await;
        Ok(DashboardStats {
            total_products: tables.products.len() as i64,
            total_orders: tables.orders.len() as i64,
            total_custom_orders: tables.custom_orders.len() as i64,
            recent_orders,
        })
    }
}
