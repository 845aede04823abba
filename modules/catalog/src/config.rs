use serde::{Deserialize, Serialize};

/// Configuration for the catalog module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// Number of demo books the store starts with.
    #[serde(default = "default_seed_books")]
    pub seed_books: usize,
    /// Capacity of the book event channel; slow subscribers lag past it.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            seed_books: default_seed_books(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_seed_books() -> usize {
    2
}

fn default_event_buffer() -> usize {
    64
}
