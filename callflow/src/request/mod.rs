//! Requests: what gets sent, how it is parameterized and how its outcome is
//! delivered.

mod callbacks;
mod envelope;
mod kind;
mod log;
mod operation;
mod params;
mod response;

pub use callbacks::{Callbacks, ErrorCallback, ProgressCallback, SuccessCallback};
pub use envelope::unwrap_envelope;
pub use kind::{HttpMethod, Media, PartType, RequestKind};
pub use log::{LogEntry, RequestLog};
pub use operation::{Outcome, Request};
pub use params::{ParamValue, Parameters, Params};
pub use response::ResponseSlot;
