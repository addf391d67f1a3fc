// kegr-net/src/lib.rs
pub mod http;
pub mod validation;

pub use http::{fetch_resource, fetch_source};
pub use validation::{validate_url, verify_checksum};
