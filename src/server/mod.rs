mod router;
mod state;
mod upload;

pub use router::build_router;
pub use state::{GatewayState, ServeHealth};
