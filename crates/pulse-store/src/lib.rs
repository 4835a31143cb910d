pub mod accounts;
pub mod chat;
pub mod database;
pub mod error;
pub mod feed;
pub mod row_helpers;
pub mod schema;
pub mod transactions;

pub use database::Database;
pub use error::StoreError;
pub use feed::ChangeFeed;
