pub mod content;
pub mod permission;
pub mod user;
pub mod volunteer;
