//! MailTrust Storage - Persistence for deliverability records
//!
//! Repository traits over domains, provider configurations, contacts and
//! rate-limit windows, with a PostgreSQL backend and an in-memory backend.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
