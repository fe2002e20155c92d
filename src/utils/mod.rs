pub mod time;

pub use time::{iss_date, parse_timestamp, today};
