//! Runs against a live Postgres when `DATABASE_URL` is set; each test returns
//! early otherwise.

use bigdecimal::BigDecimal;
use diesel::Connection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use inventory_service::models::{NewProduct, NewUser, Product};
use inventory_service::schema::users;
use inventory_service::store::postgres::DbPool;
use inventory_service::store::{InventoryStore, PgIdentity, PgInventory, ProductStore, UnitOfWork};
use inventory_service::{AdjustError, Adjustment, AdjustmentHandler};
use shared::TransactionQuery;
use std::str::FromStr;
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static MIGRATE: Once = Once::new();

type PgHandler = AdjustmentHandler<PgInventory, PgIdentity>;

struct Db {
    pool: DbPool,
    store: PgInventory,
    handler: Arc<PgHandler>,
}

async fn connect(pool_size: u32, lock_timeout: Duration) -> Option<Db> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };

    let migrate_url = url.clone();
    tokio::task::spawn_blocking(move || {
        MIGRATE.call_once(|| {
            let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&migrate_url)
                .expect("Failed to connect for migrations");
            conn.run_pending_migrations(MIGRATIONS)
                .expect("Failed to run migrations");
        });
    })
    .await
    .unwrap();

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
    let pool = DbPool::builder()
        .max_size(pool_size)
        .connection_timeout(Duration::from_secs(3))
        .build(config)
        .await
        .expect("Failed to build pool");

    let store = PgInventory::new(pool.clone(), lock_timeout);
    let handler = Arc::new(AdjustmentHandler::new(store.clone(), PgIdentity::new(pool.clone())));
    Some(Db { pool, store, handler })
}

async fn seed_user(db: &Db) -> Uuid {
    let mut conn = db.pool.get().await.unwrap();
    let user = NewUser {
        id: Uuid::new_v4(),
        username: format!("clerk-{}", Uuid::new_v4()),
    };
    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)
        .await
        .unwrap();
    user.id
}

async fn seed_product(db: &Db, quantity: i32, price: &str) -> Product {
    db.store
        .create_product(NewProduct {
            id: Uuid::new_v4(),
            name: "Super Widget".to_string(),
            price: BigDecimal::from_str(price).unwrap(),
            quantity,
            description: None,
        })
        .await
        .unwrap()
}

fn adjustment(product_id: Uuid, user_id: Uuid, change: i32) -> Adjustment {
    Adjustment {
        product_id,
        quantity_change: change,
        reason: Some("Test adjustment".to_string()),
        user_id,
    }
}

fn for_product(product_id: Uuid) -> TransactionQuery {
    TransactionQuery {
        product_id: Some(product_id),
        ..TransactionQuery::default()
    }
}

#[tokio::test]
async fn adjustment_commits_product_and_ledger_together() {
    let Some(db) = connect(4, Duration::from_secs(5)).await else { return };
    let user_id = seed_user(&db).await;
    let product = seed_product(&db, 10, "100.00").await;

    let snapshot = db.handler.adjust(adjustment(product.id, user_id, -5)).await.unwrap();
    assert_eq!(snapshot.quantity, 5);

    let entries = db.store.find_entries(&for_product(product.id)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, BigDecimal::from_str("500.00").unwrap());

    let err = db.handler.adjust(adjustment(product.id, user_id, -20)).await.unwrap_err();
    assert!(matches!(err, AdjustError::InsufficientQuantity { current: 5, requested: -20 }));
    assert_eq!(db.store.find_product(product.id).await.unwrap().unwrap().quantity, 5);
    assert_eq!(db.store.find_entries(&for_product(product.id)).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contending_withdrawals_serialize_on_row_lock() {
    let Some(db) = connect(4, Duration::from_secs(5)).await else { return };
    let user_id = seed_user(&db).await;
    let product = seed_product(&db, 10, "1.00").await;

    let tasks = (0..2).map(|_| {
        let handler = db.handler.clone();
        let adj = adjustment(product.id, user_id, -6);
        tokio::spawn(async move { handler.adjust(adj).await })
    });
    let results = futures::future::join_all(tasks).await;

    let succeeded = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    assert_eq!(succeeded, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Ok(Err(AdjustError::InsufficientQuantity { current: 4, .. })))));
    assert_eq!(db.store.find_product(product.id).await.unwrap().unwrap().quantity, 4);
}

#[tokio::test]
async fn lock_wait_is_bounded_by_lock_timeout() {
    let Some(db) = connect(4, Duration::from_millis(200)).await else { return };
    let user_id = seed_user(&db).await;
    let product = seed_product(&db, 10, "1.00").await;

    let mut holder = db.store.begin().await.unwrap();
    holder.lock_product(product.id).await.unwrap();

    let err = db.handler.adjust(adjustment(product.id, user_id, -1)).await.unwrap_err();
    assert!(err.is_lock_timeout());

    holder.rollback().await.unwrap();
    assert!(db.store.find_entries(&for_product(product.id)).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn small_pool_serves_adjustments_on_distinct_products() {
    let Some(db) = connect(2, Duration::from_secs(5)).await else { return };
    let user_id = seed_user(&db).await;
    let mut products = Vec::new();
    for _ in 0..4 {
        products.push(seed_product(&db, 100, "1.00").await);
    }

    let tasks = products.iter().map(|product| {
        let handler = db.handler.clone();
        let adj = adjustment(product.id, user_id, -1);
        tokio::spawn(async move { handler.adjust(adj).await })
    });

    for result in futures::future::join_all(tasks).await {
        let snapshot = result.unwrap().expect("adjustment should not starve the pool");
        assert_eq!(snapshot.quantity, 99);
    }
}

#[tokio::test]
async fn dropped_unit_of_work_is_not_applied() {
    let Some(db) = connect(4, Duration::from_secs(5)).await else { return };
    let user_id = seed_user(&db).await;
    let product = seed_product(&db, 10, "1.00").await;

    {
        let mut work = db.store.begin().await.unwrap();
        let mut locked = work.lock_product(product.id).await.unwrap().unwrap();
        locked.quantity = 0;
        work.save_product(&locked).await.unwrap();
    }

    assert_eq!(db.store.find_product(product.id).await.unwrap().unwrap().quantity, 10);

    let snapshot = db.handler.adjust(adjustment(product.id, user_id, -1)).await.unwrap();
    assert_eq!(snapshot.quantity, 9);
}
