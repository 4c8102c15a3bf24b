pub mod connection;
pub mod event_repository;
pub mod models;
pub mod tip_repository;

#[cfg(test)]
mod tests;

pub use connection::{establish_connection, run_migrations, DatabasePool};
pub use event_repository::ChainEventRepository;
pub use tip_repository::PgTipStore;
