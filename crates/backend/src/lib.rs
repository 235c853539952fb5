mod domain;
pub use domain::{config, endpoint};

pub mod discovery;
pub mod normalize;
pub mod session;
pub mod store;
pub mod upsert;

#[cfg(test)]
mod __tests__;
