//! Observability utilities.

mod subscriber;
mod timing;

pub use subscriber::init_tracing;
pub use timing::{RequestSpanAttributes, SpanTimer};
