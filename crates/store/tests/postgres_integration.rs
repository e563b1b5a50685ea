//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{ProductId, UserId};
use domain::{
    CartLine, CheckoutDetails, Currency, Money, Order, OrderLine, OrderStatus, PaymentAttempt,
    PaymentMethod, PaymentStatus, Product, Provider,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{OrderQuery, PostgresStore, Store, StoreError, StoreTx};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_commerce_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/002_order_admin.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let store = PostgresStore::connect(&info.connection_string, 10)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_status_history, payment_attempts, order_lines, orders, cart_lines, products")
        .execute(store.pool())
        .await
        .unwrap();

    store
}

async fn seed_product(store: &PostgresStore, stock: u32) -> Product {
    let product = Product::new(ProductId::new(), "Mug", Money::from_cents(1500), stock).unwrap();
    let mut tx = store.begin().await.unwrap();
    tx.upsert_product(&product).await.unwrap();
    tx.commit().await.unwrap();
    product
}

async fn stock_of(store: &PostgresStore, product_id: ProductId) -> u32 {
    let mut tx = store.begin().await.unwrap();
    tx.product(product_id).await.unwrap().unwrap().stock
}

async fn insert_order(store: &PostgresStore, product: &Product, quantity: u32) -> Order {
    let line = OrderLine::new(product.id, &product.name, quantity, product.price).unwrap();
    let order = Order::place(
        UserId::new(),
        vec![line],
        CheckoutDetails::new("1 Main St", PaymentMethod::EversendCard),
    )
    .unwrap();
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.commit().await.unwrap();
    order
}

#[tokio::test]
#[serial]
async fn concurrent_reservations_never_oversell() {
    let store = get_test_store().await;
    let product = seed_product(&store, 5).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        let product_id = product.id;
        handles.push(tokio::spawn(async move {
            let mut tx = store.begin().await?;
            tx.reserve_stock(product_id, 1).await?;
            tx.commit().await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(StoreError::InsufficientStock { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(rejected, 5);
    assert_eq!(stock_of(&store, product.id).await, 0);
}

#[tokio::test]
#[serial]
async fn reserve_reports_available_stock() {
    let store = get_test_store().await;
    let product = seed_product(&store, 2).await;

    let mut tx = store.begin().await.unwrap();
    let err = tx.reserve_stock(product.id, 3).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InsufficientStock {
            requested: 3,
            available: 2,
            ..
        }
    ));

    let err = tx.release_stock(ProductId::new(), 1).await.unwrap_err();
    assert!(matches!(err, StoreError::ProductNotFound(_)));
}

#[tokio::test]
#[serial]
async fn uncommitted_transaction_rolls_back() {
    let store = get_test_store().await;
    let product = seed_product(&store, 4).await;

    {
        let mut tx = store.begin().await.unwrap();
        tx.reserve_stock(product.id, 4).await.unwrap();
    }

    assert_eq!(stock_of(&store, product.id).await, 4);
}

#[tokio::test]
#[serial]
async fn order_round_trips_with_lines() {
    let store = get_test_store().await;
    let product = seed_product(&store, 10).await;
    let order = insert_order(&store, &product, 3).await;

    let mut tx = store.begin().await.unwrap();
    let loaded = tx.order(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.id(), order.id());
    assert_eq!(loaded.total().cents(), 4500);
    assert_eq!(loaded.lines().len(), 1);
    assert_eq!(loaded.lines()[0].quantity, 3);
    assert_eq!(loaded.payment_method(), PaymentMethod::EversendCard);

    let listed = tx.orders_for_user(order.user_id()).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
#[serial]
async fn order_status_update_is_compare_and_set() {
    let store = get_test_store().await;
    let product = seed_product(&store, 10).await;
    let order = insert_order(&store, &product, 1).await;

    let mut canceled = order.clone();
    canceled.transition(OrderStatus::Canceled).unwrap();
    let mut tx = store.begin().await.unwrap();
    assert!(tx.update_order(&canceled, OrderStatus::Pending).await.unwrap());
    tx.commit().await.unwrap();

    let mut paying = order.clone();
    paying.transition(OrderStatus::PaymentPending).unwrap();
    let mut tx = store.begin().await.unwrap();
    assert!(!tx.update_order(&paying, OrderStatus::Pending).await.unwrap());

    let stored = tx.order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), OrderStatus::Canceled);
}

#[tokio::test]
#[serial]
async fn tracking_id_and_status_history_persist() {
    let store = get_test_store().await;
    let product = seed_product(&store, 10).await;
    let mut order = insert_order(&store, &product, 1).await;

    let mut tx = store.begin().await.unwrap();
    tx.record_status_change(&order.placed()).await.unwrap();
    let mut steps = Vec::new();
    for next in [
        OrderStatus::PaymentPending,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
    ] {
        let previous = order.status();
        let change = order.transition(next).unwrap();
        if next == OrderStatus::Shipped {
            order.set_tracking_id("1Z999").unwrap();
        }
        assert!(tx.update_order(&order, previous).await.unwrap());
        tx.record_status_change(&change.with_notes(Some(format!("to {next}"))))
            .await
            .unwrap();
        steps.push(next);
    }
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let stored = tx.order(order.id()).await.unwrap().unwrap();
    assert_eq!(stored.tracking_id(), Some("1Z999"));

    let history = tx.status_history(order.id()).await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].from, None);
    assert_eq!(history[0].to, OrderStatus::Pending);
    assert_eq!(
        history[1..].iter().map(|c| c.to).collect::<Vec<_>>(),
        steps
    );
    assert_eq!(history[4].from, Some(OrderStatus::Processing));
    assert_eq!(history[4].notes.as_deref(), Some("to shipped"));
}

#[tokio::test]
#[serial]
async fn orders_filter_and_page() {
    let store = get_test_store().await;
    let product = seed_product(&store, 10).await;
    let first = insert_order(&store, &product, 1).await;
    let second = insert_order(&store, &product, 1).await;
    let third = insert_order(&store, &product, 1).await;

    let mut canceled = second.clone();
    canceled.transition(OrderStatus::Canceled).unwrap();
    let mut tx = store.begin().await.unwrap();
    assert!(tx.update_order(&canceled, OrderStatus::Pending).await.unwrap());

    let page = tx.orders(&OrderQuery::new()).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.orders[0].id(), third.id());
    assert_eq!(page.orders[2].id(), first.id());
    assert_eq!(page.orders[0].lines().len(), 1);

    let page = tx
        .orders(&OrderQuery::new().status(OrderStatus::Canceled))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.orders[0].id(), second.id());

    let page = tx
        .orders(&OrderQuery::new().user_id(first.user_id()))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.orders[0].id(), first.id());

    let page = tx
        .orders(&OrderQuery::new().oldest_first().limit(1).offset(1))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.orders.len(), 1);
    assert_eq!(page.orders[0].id(), second.id());
}

#[tokio::test]
#[serial]
async fn one_active_payment_per_order() {
    let store = get_test_store().await;
    let product = seed_product(&store, 10).await;
    let order = insert_order(&store, &product, 1).await;
    let currency = Currency::parse("USD").unwrap();

    let mut first = PaymentAttempt::open(order.id(), Provider::PayPal, order.total(), currency.clone());
    let mut tx = store.begin().await.unwrap();
    tx.insert_payment(&first).await.unwrap();
    tx.commit().await.unwrap();

    let second = PaymentAttempt::open(order.id(), Provider::PayPal, order.total(), currency);
    let mut tx = store.begin().await.unwrap();
    let err = tx.insert_payment(&second).await.unwrap_err();
    assert!(matches!(err, StoreError::ActivePaymentExists(_)));
    drop(tx);

    first.attach_session("PAY-1", Some("https://paypal.example/approve".into()));
    first.fail("declined");
    let mut tx = store.begin().await.unwrap();
    assert!(tx.update_payment(&first, PaymentStatus::Initiated).await.unwrap());
    tx.insert_payment(&second).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let by_ref = tx
        .payment_by_reference(Provider::PayPal, "PAY-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_ref.id, first.id);
    assert_eq!(by_ref.status, PaymentStatus::Failed);
    assert_eq!(tx.active_payments().await.unwrap().len(), 1);
    assert_eq!(tx.payments_for_order(order.id()).await.unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn cart_lines_are_per_user_and_ordered() {
    let store = get_test_store().await;
    let mug = seed_product(&store, 10).await;
    let tee = seed_product(&store, 10).await;
    let user = UserId::new();

    let mut tx = store.begin().await.unwrap();
    let first = CartLine::new(user, mug.id, &mug.name, 1, mug.price);
    tx.upsert_cart_line(&first).await.unwrap();
    let second = CartLine::new(user, tee.id, &tee.name, 2, tee.price);
    tx.upsert_cart_line(&second).await.unwrap();
    tx.upsert_cart_line(&CartLine::new(UserId::new(), mug.id, &mug.name, 1, mug.price))
        .await
        .unwrap();

    let lines = tx.cart_lines(user).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].id, first.id);
    assert_eq!(
        tx.cart_line_for_product(user, tee.id)
            .await
            .unwrap()
            .map(|l| l.id),
        Some(second.id)
    );

    let orphan = CartLine::new(user, ProductId::new(), "Ghost", 1, mug.price);
    let err = tx.upsert_cart_line(&orphan).await.unwrap_err();
    assert!(matches!(err, StoreError::ProductNotFound(_)));
}
