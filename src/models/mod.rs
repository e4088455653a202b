pub mod line;
pub mod tripping;

pub use line::*;
pub use tripping::*;
