pub mod handlers;
pub mod state;

pub use handlers::{create_router, validate_endpoint};
pub use state::ShellState;
