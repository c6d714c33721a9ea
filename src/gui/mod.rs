//! Terminal UI pieces for the `thermovib` binary.

mod device_selector;
mod error;

pub use device_selector::device_selector;
pub use error::StimGuiError;
