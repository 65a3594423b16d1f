//! The pipeline primitives handlers are composed from (§1.3): SSH (C3),
//! HTTP clients (C4), the engine channel factory (C5), and shared parameter
//! extraction helpers used by every handler in `crate::handlers`.

pub mod channel;
pub mod github;
pub mod odoo;
pub mod params;
pub mod ssh;
