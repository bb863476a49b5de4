pub mod config;
pub mod models;
pub mod catalog;
pub mod menu;
pub mod review;
pub mod quiz;
pub mod remote;
pub mod api;
pub mod extract;
pub mod assistant;
pub mod phonics;
pub mod transfer;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use models::*;
pub use session::Session;
