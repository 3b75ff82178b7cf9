//! HTTP control plane for the belt and gate.

mod handlers;
mod server;

#[cfg(test)]
mod tests;

pub use handlers::ApiError;
pub use server::{router, ControlServer, ControlState};
