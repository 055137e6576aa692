//! Record store, form decoding and access keys for the grocer price tracker.

pub mod db;
pub mod error;
pub mod form;
pub mod keys;
pub mod models;
pub mod pool;

pub use db::Database;
pub use error::StoreError;
pub use keys::KeyStore;
pub use models::{Field, FoodRecord, Mutation};
