#![recursion_limit = "256"]

#[macro_use]
extern crate derive_builder;
extern crate libc;
#[macro_use]
extern crate quick_error;
#[macro_use]
pub extern crate slog;
extern crate slog_stdlog;

// library modules
pub mod crypto;
pub mod error;
pub mod log;
pub mod pool;
pub mod trim;
pub mod tunables;
pub mod zvol;

pub use error::Error;
