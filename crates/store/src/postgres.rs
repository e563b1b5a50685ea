use std::collections::HashMap;

use async_trait::async_trait;
use common::{CartLineId, OrderId, PaymentId, ProductId, UserId};
use domain::{
    CartLine, Currency, Money, Order, OrderLine, OrderRecord, OrderStatus, OrderStatusChange,
    PaymentAttempt, PaymentStatus, Product, Provider,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OrderPage, OrderQuery, Result, StoreError,
    store::{Store, StoreTx},
};

const ACTIVE_PAYMENT_INDEX: &str = "one_active_payment_per_order";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx> {
        Ok(PostgresTx {
            tx: self.pool.begin().await?,
        })
    }
}

/// A database transaction. Rolled back on drop unless committed.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Integrity(format!("negative value {value} in {column}")))
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Integrity(format!("quantity {value} too large")))
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock: to_u32(row.try_get("stock")?, "products.stock")?,
        active: row.try_get("active")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart_line(row: PgRow) -> Result<CartLine> {
    Ok(CartLine {
        id: CartLineId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        product_name: row.try_get("product_name")?,
        quantity: to_u32(row.try_get("quantity")?, "cart_lines.quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order_line(row: &PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        product_name: row.try_get("product_name")?,
        quantity: to_u32(row.try_get("quantity")?, "order_lines.quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        line_total: Money::from_cents(row.try_get("line_total_cents")?),
    })
}

fn row_to_order(row: PgRow, lines: Vec<OrderLine>) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let payment_method: String = row.try_get("payment_method")?;
    Ok(Order::restore(OrderRecord {
        id: OrderId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        lines,
        total: Money::from_cents(row.try_get("total_cents")?),
        status: status.parse()?,
        payment_reference: row.try_get("payment_reference")?,
        tracking_id: row.try_get("tracking_id")?,
        payment_method: payment_method.parse()?,
        shipping_address: row.try_get("shipping_address")?,
        billing_address: row.try_get("billing_address")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

fn row_to_status_change(row: PgRow) -> Result<OrderStatusChange> {
    let from: Option<String> = row.try_get("from_status")?;
    let to: String = row.try_get("to_status")?;
    Ok(OrderStatusChange {
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        from: from.map(|s| s.parse()).transpose()?,
        to: to.parse()?,
        notes: row.try_get("notes")?,
        changed_at: row.try_get("changed_at")?,
    })
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::Integrity(format!("page bound {value} too large")))
}

fn row_to_payment(row: PgRow) -> Result<PaymentAttempt> {
    let provider: String = row.try_get("provider")?;
    let currency: String = row.try_get("currency")?;
    let status: String = row.try_get("status")?;
    Ok(PaymentAttempt {
        id: PaymentId::from_uuid(row.try_get("id")?),
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        provider: provider.parse()?,
        provider_reference: row.try_get("provider_reference")?,
        payment_url: row.try_get("payment_url")?,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        currency: Currency::parse(&currency)?,
        status: status.parse()?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl PostgresTx {
    async fn lines_for_orders(&mut self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderLine>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity, unit_price_cents, line_total_cents
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            lines
                .entry(order_id)
                .or_default()
                .push(row_to_order_line(row)?);
        }
        Ok(lines)
    }

    async fn hydrate_orders(&mut self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut lines = self.lines_for_orders(&ids).await?;
        rows.into_iter()
            .zip(ids)
            .map(|(row, id)| row_to_order(row, lines.remove(&id).unwrap_or_default()))
            .collect()
    }

    async fn fetch_order(&mut self, id: OrderId, for_update: bool) -> Result<Option<Order>> {
        let sql = if for_update {
            "SELECT * FROM orders WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT * FROM orders WHERE id = $1"
        };
        let row = sqlx::query(sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        match row {
            Some(row) => Ok(self.hydrate_orders(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn has_active_payment(&mut self, order_id: OrderId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM payment_attempts
                WHERE order_id = $1 AND status IN ('initiated', 'processing')
            )
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>> {
        sqlx::query("SELECT id, name, price_cents, stock, active, updated_at FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(row_to_product)
            .transpose()
    }

    async fn upsert_product(&mut self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock, active, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(to_i32(product.stock)?)
        .bind(product.active)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn reserve_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2",
        )
        .bind(product_id.as_uuid())
        .bind(to_i32(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let available: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        match available {
            Some(available) => Err(StoreError::InsufficientStock {
                product_id,
                requested: quantity,
                available: to_u32(available, "products.stock")?,
            }),
            None => Err(StoreError::ProductNotFound(product_id)),
        }
    }

    async fn release_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(product_id.as_uuid())
        .bind(to_i32(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ProductNotFound(product_id));
        }
        Ok(())
    }

    async fn cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, product_id, product_name, quantity, unit_price_cents, created_at, updated_at
            FROM cart_lines
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_cart_line).collect()
    }

    async fn cart_line(
        &mut self,
        user_id: UserId,
        line_id: CartLineId,
    ) -> Result<Option<CartLine>> {
        sqlx::query(
            r#"
            SELECT id, user_id, product_id, product_name, quantity, unit_price_cents, created_at, updated_at
            FROM cart_lines
            WHERE user_id = $1 AND id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(line_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(row_to_cart_line)
        .transpose()
    }

    async fn cart_line_for_product(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartLine>> {
        sqlx::query(
            r#"
            SELECT id, user_id, product_id, product_name, quantity, unit_price_cents, created_at, updated_at
            FROM cart_lines
            WHERE user_id = $1 AND product_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(row_to_cart_line)
        .transpose()
    }

    async fn upsert_cart_line(&mut self, line: &CartLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_lines (id, user_id, product_id, product_name, quantity, unit_price_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(line.user_id.as_uuid())
        .bind(line.product_id.as_uuid())
        .bind(&line.product_name)
        .bind(to_i32(line.quantity)?)
        .bind(line.unit_price.cents())
        .bind(line.created_at)
        .bind(line.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return StoreError::ProductNotFound(line.product_id);
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn delete_cart_line(&mut self, user_id: UserId, line_id: CartLineId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE user_id = $1 AND id = $2")
            .bind(user_id.as_uuid())
            .bind(line_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_cents, status, payment_reference, tracking_id,
                                payment_method, shipping_address, billing_address, notes,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.total().cents())
        .bind(order.status().as_str())
        .bind(order.payment_reference())
        .bind(order.tracking_id())
        .bind(order.payment_method().as_str())
        .bind(order.shipping_address())
        .bind(order.billing_address())
        .bind(order.notes())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await?;

        for (position, line) in order.lines().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, position, product_id, product_name, quantity,
                                         unit_price_cents, line_total_cents)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(position as i32)
            .bind(line.product_id.as_uuid())
            .bind(&line.product_name)
            .bind(to_i32(line.quantity)?)
            .bind(line.unit_price.cents())
            .bind(line.line_total.cents())
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.fetch_order(id, false).await
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.fetch_order(id, true).await
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        self.hydrate_orders(rows).await
    }

    async fn orders(&mut self, query: &OrderQuery) -> Result<OrderPage> {
        const FILTER: &str = "($1::text IS NULL OR status = $1) AND ($2::uuid IS NULL OR user_id = $2)";

        let status = query.status.map(|s| s.as_str());
        let user_id = query.user_id.map(|u| u.as_uuid());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM orders WHERE {FILTER}"))
            .bind(status)
            .bind(user_id)
            .fetch_one(&mut *self.tx)
            .await?;

        let direction = if query.oldest_first { "ASC" } else { "DESC" };
        let rows = sqlx::query(&format!(
            "SELECT * FROM orders WHERE {FILTER} ORDER BY created_at {direction}, id {direction} LIMIT $3 OFFSET $4"
        ))
        .bind(status)
        .bind(user_id)
        .bind(to_i64(query.page_size())?)
        .bind(to_i64(query.skip())?)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(OrderPage {
            orders: self.hydrate_orders(rows).await?,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn update_order(&mut self, order: &Order, expected: OrderStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, payment_reference = $4, tracking_id = $5, updated_at = $6
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(expected.as_str())
        .bind(order.status().as_str())
        .bind(order.payment_reference())
        .bind(order.tracking_id())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_status_change(&mut self, change: &OrderStatusChange) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_status_history (order_id, from_status, to_status, notes, changed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(change.order_id.as_uuid())
        .bind(change.from.map(|s| s.as_str()))
        .bind(change.to.as_str())
        .bind(change.notes.as_deref())
        .bind(change.changed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return StoreError::Integrity(format!(
                    "status change references unknown order {}",
                    change.order_id
                ));
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn status_history(&mut self, order_id: OrderId) -> Result<Vec<OrderStatusChange>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, from_status, to_status, notes, changed_at
            FROM order_status_history
            WHERE order_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(row_to_status_change).collect()
    }

    async fn insert_payment(&mut self, attempt: &PaymentAttempt) -> Result<()> {
        if attempt.is_active() && self.has_active_payment(attempt.order_id).await? {
            return Err(StoreError::ActivePaymentExists(attempt.order_id));
        }

        sqlx::query(
            r#"
            INSERT INTO payment_attempts (id, order_id, provider, provider_reference, payment_url,
                                          amount_cents, currency, status, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(attempt.id.as_uuid())
        .bind(attempt.order_id.as_uuid())
        .bind(attempt.provider.as_str())
        .bind(attempt.provider_reference.as_deref())
        .bind(attempt.payment_url.as_deref())
        .bind(attempt.amount.cents())
        .bind(attempt.currency.as_str())
        .bind(attempt.status.as_str())
        .bind(attempt.error_message.as_deref())
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(ACTIVE_PAYMENT_INDEX)
            {
                return StoreError::ActivePaymentExists(attempt.order_id);
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn payment(&mut self, id: PaymentId) -> Result<Option<PaymentAttempt>> {
        sqlx::query("SELECT * FROM payment_attempts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(row_to_payment)
            .transpose()
    }

    async fn payment_by_reference(
        &mut self,
        provider: Provider,
        reference: &str,
    ) -> Result<Option<PaymentAttempt>> {
        sqlx::query(
            "SELECT * FROM payment_attempts WHERE provider = $1 AND provider_reference = $2",
        )
        .bind(provider.as_str())
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(row_to_payment)
        .transpose()
    }

    async fn payments_for_order(&mut self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let rows = sqlx::query(
            "SELECT * FROM payment_attempts WHERE order_id = $1 ORDER BY created_at ASC",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(row_to_payment).collect()
    }

    async fn active_payment(&mut self, order_id: OrderId) -> Result<Option<PaymentAttempt>> {
        sqlx::query(
            r#"
            SELECT * FROM payment_attempts
            WHERE order_id = $1 AND status IN ('initiated', 'processing')
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(row_to_payment)
        .transpose()
    }

    async fn active_payments(&mut self) -> Result<Vec<PaymentAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM payment_attempts
            WHERE status IN ('initiated', 'processing')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(row_to_payment).collect()
    }

    async fn update_payment(
        &mut self,
        attempt: &PaymentAttempt,
        expected: PaymentStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_attempts
            SET provider_reference = $3, payment_url = $4, status = $5, error_message = $6, updated_at = $7
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(attempt.id.as_uuid())
        .bind(expected.as_str())
        .bind(attempt.provider_reference.as_deref())
        .bind(attempt.payment_url.as_deref())
        .bind(attempt.status.as_str())
        .bind(attempt.error_message.as_deref())
        .bind(attempt.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
