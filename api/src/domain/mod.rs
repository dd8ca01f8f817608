//! Domain layer - models and DB queries

pub mod accounts;
pub mod oauth_states;
pub mod platform;
pub mod posts;
pub mod users;
pub mod videos;

pub use platform::Platform;
