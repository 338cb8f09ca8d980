pub mod manager;
pub mod store;

pub use manager::*;
pub use store::*;
