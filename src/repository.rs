use crate::{
    error::StoreError,
    models::{Book, CreateBookRequest, Profile, ProfileRow, Role},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, query_builder::QueryBuilder};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

/// Repository Trait
///
/// The persistence contract used by the role resolver and the book views. Handlers
/// and the gate only see this trait, so tests swap in `MemoryRepository`.
///
/// Profile operations keep `NotFound` and `Conflict` distinct from backend failures:
/// the role resolver's create-on-miss logic depends on it.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Profiles ---
    /// Returns `StoreError::NotFound` when the identity has no profile yet.
    async fn get_profile(&self, id: Uuid) -> Result<Profile, StoreError>;
    /// Returns `StoreError::Conflict` when a profile for `id` already exists.
    async fn insert_profile(&self, id: Uuid, role: Role) -> Result<Profile, StoreError>;

    // --- Books ---
    /// Case-insensitive substring match on title or author. LIKE wildcards in `search`
    /// match literally.
    async fn list_books(&self, search: Option<String>) -> Result<Vec<Book>, StoreError>;
    /// Returns `StoreError::NotFound` when no book has this id.
    async fn get_book(&self, id: Uuid) -> Result<Book, StoreError>;
    async fn count_books(&self) -> Result<i64, StoreError>;
    async fn create_book(&self, req: CreateBookRequest) -> Result<Book, StoreError>;
    /// Returns `StoreError::NotFound` when no row was deleted.
    async fn delete_book(&self, id: Uuid) -> Result<(), StoreError>;
}

/// RepositoryState
///
/// The shared handle stored in `AppState`.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// `Repository` backed by the Supabase Postgres database.
///
/// Expected tables:
/// - `profiles (id uuid primary key, role text not null)`
/// - `books (id uuid primary key, title text, author text, description text,
///   cover_url text, pdf_url text, created_at timestamptz)`
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
    async fn get_profile(&self, id: Uuid) -> Result<Profile, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT id, role FROM profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        Profile::try_from(row).map_err(StoreError::Backend)
    }

    /// insert_profile
    ///
    /// `ON CONFLICT DO NOTHING` turns a lost creation race into an empty result
    /// instead of an error, which is reported as `Conflict`.
    async fn insert_profile(&self, id: Uuid, role: Role) -> Result<Profile, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "INSERT INTO profiles (id, role) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING RETURNING id, role",
        )
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::Conflict)?;

        Profile::try_from(row).map_err(StoreError::Backend)
    }

    async fn list_books(&self, search: Option<String>) -> Result<Vec<Book>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT id, title, author, description, cover_url, pdf_url, created_at FROM books",
        );

        if let Some(s) = search.filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(&s);
            builder.push(" WHERE (title ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(r" ESCAPE '\' OR author ILIKE ");
            builder.push_bind(pattern);
            builder.push(r" ESCAPE '\')");
        }

        builder.push(" ORDER BY created_at DESC");

        builder
            .build_query_as::<Book>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("list_books error: {:?}", e);
                StoreError::from(e)
            })
    }

    async fn get_book(&self, id: Uuid) -> Result<Book, StoreError> {
        sqlx::query_as::<_, Book>(
            "SELECT id, title, author, description, cover_url, pdf_url, created_at FROM books WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn count_books(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn create_book(&self, req: CreateBookRequest) -> Result<Book, StoreError> {
        sqlx::query_as::<_, Book>(
            r#"INSERT INTO books (id, title, author, description, cover_url, pdf_url, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, NOW())
               RETURNING id, title, author, description, cover_url, pdf_url, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(req.title)
        .bind(req.author)
        .bind(req.description)
        .bind(req.cover_url)
        .bind(req.pdf_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("create_book error: {:?}", e);
            StoreError::from(e)
        })
    }

    async fn delete_book(&self, id: Uuid) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() > 0 {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }
}

/// like_pattern
///
/// Wraps a search term for `ILIKE ... ESCAPE '\'` so that LIKE wildcards typed by
/// the reader are matched literally.
pub fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.trim().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// MemoryRepository
///
/// In-process `Repository` used by the test-suite and for running the app without a
/// database. The profile map enforces the same one-row-per-id constraint as the
/// Postgres primary key.
#[derive(Default)]
pub struct MemoryRepository {
    profiles: Mutex<HashMap<Uuid, Role>>,
    books: Mutex<Vec<Book>>,
    profile_inserts: AtomicUsize,
    /// When set, every profile read fails with a backend error.
    fail_profile_reads: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, id: Uuid, role: Role) -> Self {
        self.profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, role);
        self
    }

    pub fn with_book(self, book: Book) -> Self {
        self.books
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(book);
        self
    }

    pub fn set_fail_profile_reads(&self, fail: bool) {
        self.fail_profile_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of successful profile insertions so far.
    pub fn profile_inserts(&self) -> usize {
        self.profile_inserts.load(Ordering::SeqCst)
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_profile(&self, id: Uuid) -> Result<Profile, StoreError> {
        if self.fail_profile_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated read failure".to_string()));
        }
        let profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        profiles
            .get(&id)
            .map(|role| Profile { id, role: *role })
            .ok_or(StoreError::NotFound)
    }

    async fn insert_profile(&self, id: Uuid, role: Role) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        if profiles.contains_key(&id) {
            return Err(StoreError::Conflict);
        }
        profiles.insert(id, role);
        self.profile_inserts.fetch_add(1, Ordering::SeqCst);
        Ok(Profile { id, role })
    }

    async fn list_books(&self, search: Option<String>) -> Result<Vec<Book>, StoreError> {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut found: Vec<Book> = books
            .iter()
            .filter(|b| match &needle {
                Some(n) => {
                    b.title.to_lowercase().contains(n) || b.author.to_lowercase().contains(n)
                }
                None => true,
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn get_book(&self, id: Uuid) -> Result<Book, StoreError> {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn count_books(&self) -> Result<i64, StoreError> {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        Ok(books.len() as i64)
    }

    async fn create_book(&self, req: CreateBookRequest) -> Result<Book, StoreError> {
        let book = Book {
            id: Uuid::new_v4(),
            title: req.title,
            author: req.author,
            description: req.description,
            cover_url: req.cover_url,
            pdf_url: req.pdf_url,
            created_at: Utc::now(),
        };
        self.books
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(book.clone());
        Ok(book)
    }

    async fn delete_book(&self, id: Uuid) -> Result<(), StoreError> {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        let before = books.len();
        books.retain(|b| b.id != id);
        if books.len() < before {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }
}
