pub mod config;
pub mod error;
pub mod estimation;
pub mod geometry;
pub mod imaging;
pub mod io;
pub mod logging;
pub mod mapping;
pub mod registration;
pub mod scan;

pub use error::{MapError, RegistrationFailure, Result};
