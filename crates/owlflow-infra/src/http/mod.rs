//! Outbound HTTP for `http_request` steps.

pub mod client;

pub use client::ReqwestHttpClient;
