//! Runtime configuration: TOML file, `TURNLOOP_*` env overrides, validation.

mod loading;
mod types;
mod validation;

#[cfg(test)]
mod tests;

pub use loading::load_dotenv;
pub use types::*;
