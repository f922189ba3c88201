pub mod engine;
pub mod manager;
pub mod models;
pub mod sqlserver;

pub use engine::{DatabaseEngine, UnsupportedEngine};
pub use manager::{DatabaseError, DatabaseManager};
