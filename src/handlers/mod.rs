pub mod execute;
pub mod health;

pub use execute::*;
pub use health::*;
