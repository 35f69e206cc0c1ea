/// Database model definitions.
pub mod models;
/// Store trait and its backends.
pub mod quiz_store;
/// Storage abstraction layer for database operations.
pub mod storage;
