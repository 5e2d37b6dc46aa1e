//! # Callflow
//!
//! An asynchronous, retrying, chainable request pipeline for remote API calls.
//!
//! Callflow turns one logical operation into a sequence of dependent network
//! calls with support for:
//!
//! - **Retry budgets**: per-request attempt limits, where zero means unlimited
//! - **Chaining**: each step is built from the parsed result of the previous one
//! - **Captcha recovery**: a shared coordinator holds a request until its
//!   challenge is answered and injects the answer into the next attempt
//! - **Cancellation**: in-flight attempts race a per-request flag
//! - **Callback redirection**: callbacks set on a chain reach the live step
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use callflow::prelude::*;
//! use std::sync::Arc;
//!
//! let session = Session::builder(Arc::new(HttpTransport::new()))
//!     .with_token(Arc::new(StaticToken::new(token)))
//!     .build();
//!
//! let chain = session
//!     .api("photos.getMessagesUploadServer", Params::new())
//!     .chain(move |response| {
//!         Ok(uploader.upload(forced_str(&response, "upload_url")?, media, PartType::Photo))
//!     });
//!
//! chain.on_progress(|done, total| println!("{done}/{total}"));
//! let payload = chain.send().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod captcha;
pub mod config;
pub mod errors;
pub mod ids;
pub mod observability;
pub mod pipeline;
pub mod request;
pub mod session;
pub mod testing;
pub mod token;
pub mod transport;
pub mod upload;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::captcha::{CaptchaAnswer, CaptchaChallenge, CaptchaCoordinator, CaptchaState};
    pub use crate::config::{RequestConfig, SendMode, SessionConfig};
    pub use crate::errors::{ApiError, CaptchaError, ErrorClass, RequestError, TransportError};
    pub use crate::ids::IdAllocator;
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        forced_int, forced_str, optional_str, BackoffConfig, BackoffStrategy, Call, Chain,
        JitterStrategy,
    };
    pub use crate::request::{
        HttpMethod, Media, Outcome, ParamValue, Params, PartType, Request, RequestKind,
    };
    pub use crate::session::{Session, SessionBuilder};
    pub use crate::token::{NoToken, StaticToken, TokenProvider};
    pub use crate::transport::{AttemptRequest, ProgressReporter, Transport};
    pub use crate::upload::{GeoPoint, MainPhotoCrop, UploadTarget, MAX_ALBUM_PHOTOS};

    #[cfg(feature = "http")]
    pub use crate::transport::HttpTransport;
}
