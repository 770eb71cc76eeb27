pub mod app;
pub mod db;
pub mod errors;
pub mod events;
pub mod jwt;
pub mod models;
pub mod permissions;
pub mod routes;
pub mod utils;

// Re-export commonly used items for tests
pub use app::create_app;
