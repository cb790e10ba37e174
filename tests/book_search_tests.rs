use library_portal::{
    models::Book,
    repository::{MemoryRepository, Repository, like_pattern},
};
use uuid::Uuid;

fn book(title: &str, author: &str) -> Book {
    Book {
        id: Uuid::new_v4(),
        title: title.to_string(),
        author: author.to_string(),
        ..Book::default()
    }
}

// --- Search pattern ---

#[test]
fn test_like_pattern_wraps_and_trims() {
    assert_eq!(like_pattern("  dune "), "%dune%");
}

#[test]
fn test_like_pattern_escapes_wildcards() {
    assert_eq!(like_pattern("%"), r"%\%%");
    assert_eq!(like_pattern("100%_pure"), r"%100\%\_pure%");
    assert_eq!(like_pattern(r"C:\books"), r"%C:\\books%");
}

// --- In-memory search ---

#[tokio::test]
async fn test_wildcards_match_literally() {
    let repo = MemoryRepository::new()
        .with_book(book("Dune", "Frank Herbert"))
        .with_book(book("100% Pure", "Anon"));

    let all = repo.list_books(Some("%".to_string())).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "100% Pure");

    assert!(repo.list_books(Some("_".to_string())).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_search_lists_everything() {
    let repo = MemoryRepository::new()
        .with_book(book("Dune", "Frank Herbert"))
        .with_book(book("Emma", "Jane Austen"));

    assert_eq!(repo.list_books(Some("   ".to_string())).await.unwrap().len(), 2);
    assert_eq!(repo.list_books(Some("AUSTEN".to_string())).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_book_by_id() {
    let dune = book("Dune", "Frank Herbert");
    let repo = MemoryRepository::new().with_book(dune.clone());

    assert_eq!(repo.get_book(dune.id).await.unwrap().title, "Dune");
    assert!(repo.get_book(Uuid::new_v4()).await.is_err());
}
