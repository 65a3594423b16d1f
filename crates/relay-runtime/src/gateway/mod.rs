//! C8: the webhook ingress — authenticates inbound GitHub/Odoo events and
//! republishes them as correlation messages to the engine (§4.8).

mod auth;
mod github_webhook;
mod odoo_webhook;
mod server;

pub use auth::{constant_time_eq, verify_github_signature};
pub use server::{router, GatewayState};
