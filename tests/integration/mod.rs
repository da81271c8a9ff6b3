//! Integration tests for Nodexia
//!
//! Run against an in-memory database through the public crate API and the
//! assembled HTTP router.

mod dispatch_lifecycle;
mod http_api;
