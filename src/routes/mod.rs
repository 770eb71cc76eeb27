pub mod auth;
pub mod content;
pub mod health;
pub mod permissions;
pub mod volunteers;
