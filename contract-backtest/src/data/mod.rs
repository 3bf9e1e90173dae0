pub mod types;

pub use types::{Bar, MarkField, OptionType};
