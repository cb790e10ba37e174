use library_portal::{
    error::StoreError,
    models::{CreateBookRequest, Role},
    repository::{PostgresRepository, Repository},
};
use sqlx::PgPool;
use tokio::test;
use uuid::Uuid;

// These run against a real Postgres. Point DATABASE_URL at a scratch database and
// run with `--ignored`.

// --- Test Context and Setup ---

struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

fn book(title: &str, author: &str) -> CreateBookRequest {
    CreateBookRequest {
        title: title.to_string(),
        author: author.to_string(),
        ..CreateBookRequest::default()
    }
}

// --- Profiles ---

#[test]
#[ignore = "requires DATABASE_URL"]
async fn test_profile_insert_then_get() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let id = Uuid::new_v4();

    assert!(matches!(repo.get_profile(id).await, Err(StoreError::NotFound)));

    let created = repo.insert_profile(id, Role::Admin).await.unwrap();
    assert_eq!(created.role, Role::Admin);
    assert_eq!(repo.get_profile(id).await.unwrap(), created);
}

#[test]
#[ignore = "requires DATABASE_URL"]
async fn test_second_profile_insert_conflicts_and_keeps_first() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let id = Uuid::new_v4();

    repo.insert_profile(id, Role::User).await.unwrap();
    assert!(matches!(
        repo.insert_profile(id, Role::Admin).await,
        Err(StoreError::Conflict)
    ));
    assert_eq!(repo.get_profile(id).await.unwrap().role, Role::User);
}

// --- Books ---

#[test]
#[ignore = "requires DATABASE_URL"]
async fn test_book_search_and_delete() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let marker = Uuid::new_v4().simple().to_string();

    let dune = repo
        .create_book(book(&format!("Dune {}", marker), "Frank Herbert"))
        .await
        .unwrap();
    repo.create_book(book(&format!("Emma {}", marker), "Jane Austen"))
        .await
        .unwrap();

    let by_title = repo.list_books(Some(marker.to_uppercase())).await.unwrap();
    assert_eq!(by_title.len(), 2, "search is case-insensitive");
    assert!(
        by_title[0].created_at >= by_title[1].created_at,
        "newest first"
    );

    let by_author = repo
        .list_books(Some("herbert".to_string()))
        .await
        .unwrap();
    assert!(by_author.iter().any(|b| b.id == dune.id));

    repo.delete_book(dune.id).await.unwrap();
    assert!(matches!(repo.delete_book(dune.id).await, Err(StoreError::NotFound)));
}

#[test]
#[ignore = "requires DATABASE_URL"]
async fn test_book_search_treats_wildcards_literally() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let marker = Uuid::new_v4().simple().to_string();

    let literal = repo
        .create_book(book(&format!("100%_{}", marker), "Anon"))
        .await
        .unwrap();
    repo.create_book(book(&format!("100ab{}", marker), "Anon"))
        .await
        .unwrap();

    let found = repo
        .list_books(Some(format!("100%_{}", marker)))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, literal.id);

    let fetched = repo.get_book(literal.id).await.unwrap();
    assert_eq!(fetched.title, literal.title);
    assert!(matches!(repo.get_book(Uuid::new_v4()).await, Err(StoreError::NotFound)));
}
