pub mod config;
pub mod engine_auth;
pub mod error;
pub mod job;
pub mod message;
pub mod observability;
pub mod retry;
pub mod server;

pub use config::Config;
pub use engine_auth::{EngineAuth, OAuth2State};
pub use error::{RelayError, Result};
pub use job::{CommandResult, HandlerMeta, Job, JobOutcome, Middleware, Variables};
pub use message::Message;
pub use observability::init_tracing;
pub use retry::retry;
pub use server::{ServerConfig, ServerRegistry};
