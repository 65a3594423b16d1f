pub mod gateway;
pub mod handlers;
pub mod jobs;
pub mod pipeline;
pub mod supervisor;

pub use gateway::{router, GatewayState};
pub use handlers::{HandlerCtx, HandlerEntry, HandlerFn, HandlerRegistry};
pub use jobs::{run_job_runtime, JobRuntimeConfig};
pub use pipeline::channel::ChannelFactory;
pub use pipeline::github::GitHubClient;
pub use pipeline::odoo::OdooClient;
pub use pipeline::ssh::SshPool;
pub use supervisor::Supervisor;
