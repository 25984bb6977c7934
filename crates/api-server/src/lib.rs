#![warn(clippy::unwrap_used)]

pub mod rest;
pub mod segment_rest;
pub mod server;
pub mod swagger;

pub use server::ApiServer;
pub use swagger::ApiDoc;
