//! State module for tracking work item progress
//!
//! `ItemStatus` is the lifecycle every work item moves through. The checkpoint stores
//! persist it and reject transitions the lifecycle does not allow.

mod item_status;

pub use item_status::ItemStatus;
