//! Repository layer for data access

pub mod contacts;
pub mod domains;
pub mod providers;
pub mod rate_limits;

// Re-export repository traits
pub use contacts::ContactRepository;
pub use domains::DomainRepository;
pub use providers::ProviderConfigRepository;
pub use rate_limits::{IncrementOutcome, RateLimitRepository};

// Re-export PostgreSQL implementations
pub use contacts::DbContactRepository;
pub use domains::DbDomainRepository;
pub use providers::DbProviderConfigRepository;
pub use rate_limits::DbRateLimitRepository;
