pub mod clock;
pub mod config;
pub mod error;
pub mod security;
pub mod storage;
pub mod identity;
pub mod server;
