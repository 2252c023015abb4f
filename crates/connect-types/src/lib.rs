/// Shared data model for the Connect chat core.
///
/// `models` are the rows persisted in the message store, `api` the views
/// handed to the UI collaborator, `signal` the opaque call-signalling payload.
pub mod api;
pub mod models;
pub mod signal;
