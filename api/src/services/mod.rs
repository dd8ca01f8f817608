pub mod auth;
pub mod cookies;
pub mod db;
pub mod error;
pub mod password;
pub mod platforms;
pub mod rate_limit;
pub mod session;
