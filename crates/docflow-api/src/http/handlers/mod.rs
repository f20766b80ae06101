//! REST API request handlers.

pub mod run;
