//! Offline-resilience caching proxy for the Encore workshop registration app.
//!
//! Every outgoing request of the app is classified and answered by one of
//! three strategies over versioned cache generations, with a well-formed
//! fallback when the network is gone. Each deployed version is installed,
//! activated and takes over open clients through [`InterceptionController`].

pub mod background;
pub mod cache;
pub mod classify;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod net;
pub mod notify;
pub mod policy;

#[cfg(test)]
mod testing;

pub use controller::InterceptionController;
pub use error::ProxyError;
