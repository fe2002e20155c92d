pub mod iss;

pub use iss::IssClient;
