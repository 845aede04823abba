use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    pub title: String,
    pub author: String,
}

const SEED: &[(&str, &str)] = &[
    ("The Dispossessed", "Ursula K. Le Guin"),
    ("Dune", "Frank Herbert"),
    ("A Wizard of Earthsea", "Ursula K. Le Guin"),
    ("Hyperion", "Dan Simmons"),
];

/// In-memory book collection shared by every resolver of the module.
#[derive(Debug, Default)]
pub struct BookStore {
    books: RwLock<Vec<Book>>,
    next_id: AtomicU64,
}

impl BookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the first `count` demo books; the list repeats past its end.
    pub fn seeded(count: usize) -> Self {
        let store = Self::new();
        for (title, author) in SEED.iter().cycle().take(count) {
            store.add(title, author);
        }
        store
    }

    pub fn add(&self, title: &str, author: &str) -> Book {
        let book = Book {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            title: title.to_string(),
            author: author.to_string(),
        };
        self.books.write().push(book.clone());
        debug!(id = book.id, title, "book added");
        book
    }

    pub fn get(&self, id: u64) -> Option<Book> {
        self.books.read().iter().find(|b| b.id == id).cloned()
    }

    pub fn list(&self) -> Vec<Book> {
        self.books.read().clone()
    }

    pub fn by_author(&self, author: &str) -> Vec<Book> {
        self.books
            .read()
            .iter()
            .filter(|b| b.author == author)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
