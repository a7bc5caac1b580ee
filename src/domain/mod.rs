pub mod backoff;
pub mod message;
pub mod store;
