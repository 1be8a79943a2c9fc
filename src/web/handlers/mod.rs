pub mod broadcast_handlers;
pub mod candidate_handlers;
pub mod offer_handlers;
pub mod system_handlers;

pub use broadcast_handlers::*;
pub use candidate_handlers::*;
pub use offer_handlers::*;
pub use system_handlers::*;
