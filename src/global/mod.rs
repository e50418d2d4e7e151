//! Platform directories for the configuration store, tools and logs.

pub mod utils;
