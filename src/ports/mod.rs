//! Port traits: the seams between the domain and the outside world.

pub mod audit_port;
pub mod config_port;
pub mod price_port;
pub mod scoring_port;
