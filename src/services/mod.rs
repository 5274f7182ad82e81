pub mod broker;
pub mod classifier;
pub mod content_store;
pub mod queue;
pub mod results;
pub mod submitter;
pub mod worker;
