//! The authenticated request pipeline.
//!
//! Stages run in a fixed order for every request:
//! - `RequestInterceptor`: attach the current access credential
//! - `Transport`: dispatch
//! - `ResponseInterceptor`: on an expired credential, refresh through the
//!   single-flight coordinator and replay the request once
//!
//! `AuthPipeline` wires the three together.

pub mod pipeline;
pub mod request;
pub mod response;

pub use pipeline::AuthPipeline;
pub use request::{PreparedRequest, RequestInterceptor};
pub use response::{ResponseClass, ResponseInterceptor};
