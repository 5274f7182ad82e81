//! Prediction job pipeline
//!
//! Uploads are stored under a content hash, turned into prediction jobs on a
//! shared Redis queue, and answered by worker processes that publish results
//! back under the originating job id. Submitters wait on that id, bounded by
//! a deadline, and hand the prediction to their caller.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
