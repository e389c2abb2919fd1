pub mod config;
pub mod errors;
pub mod space;

pub use config::*;
pub use errors::*;
pub use space::*;
