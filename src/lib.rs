pub mod config;
pub mod error;
pub mod fetch;
pub mod records;
pub mod services;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{FetchError, Result};
pub use services::IssClient;
