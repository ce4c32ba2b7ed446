// HTTP routes
pub mod crm;
pub mod health;

pub use crm::*;
pub use health::*;
