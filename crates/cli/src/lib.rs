//! Public library modules for the CLI crate
pub mod lock;
pub mod logging;
