pub mod events;
pub mod store;

pub use events::{BookEvent, BookEvents};
pub use store::{Book, BookStore};
