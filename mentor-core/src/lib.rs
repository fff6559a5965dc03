pub mod config;
pub mod context;
pub mod db;
pub mod encryption;
pub mod error;
pub mod money;
pub mod redis;
pub mod schema;
pub mod signature;
pub mod types;

pub use config::Config;
pub use context::AppContext;
pub use db::{DbConnection, DbPool};
pub use encryption::{decrypt_message, encrypt_message};
pub use error::{ErrorKind, MentorError, Result};
pub use redis::RedisPool;
pub use signature::{verify_stripe_signature, verify_zoom_signature, SignatureError};
