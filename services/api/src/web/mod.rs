pub mod admin;
pub mod auth;
pub mod broker;
pub mod middleware;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod tracking;
pub mod ws_handler;

#[cfg(test)]
mod test_support;

// Re-export what the binary needs to build the server.
pub use broker::ChannelBroker;
pub use routes::{cors_layer, router};
pub use state::AppState;
