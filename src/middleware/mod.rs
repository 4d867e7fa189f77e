//! Axum middleware for admission control.
//!
//! Provides a Tower layer that runs a [`RateLimiter`](crate::RateLimiter) in
//! front of an Axum router. Allowed requests get the quota headers attached
//! to the handler's response; denied requests are answered with HTTP 429 and
//! the JSON rejection body.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use skp_throttle::{Quota, RateLimiter, middleware::RateLimitLayer};
//!
//! let limiter = RateLimiter::builder(Quota::new(10, 20)).build()?;
//!
//! let app = Router::new()
//!     .route("/api/data", get(handler))
//!     .layer(RateLimitLayer::new(limiter));
//! ```

mod layer;

pub use layer::{RateLimitLayer, RateLimitService, Subject, decision_response, request_info};
