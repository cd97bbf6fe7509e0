//! Agent session server adapter.

pub mod http_client;

pub use http_client::HttpSessionClient;
