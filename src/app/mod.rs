pub mod errors;
pub mod factory;

pub use factory::{AppFactory, AppServices};
