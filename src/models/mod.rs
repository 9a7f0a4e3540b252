pub mod error;
pub mod execute;
pub mod health;

pub use error::*;
pub use execute::*;
pub use health::*;
