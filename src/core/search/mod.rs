mod google_books;
mod provider;

pub use google_books::GoogleBooksSearch;
pub use provider::*;
