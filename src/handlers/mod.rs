// Handler modules
pub mod actions;
pub mod session;

// Re-export handler functions
pub use actions::{ACTIONS, global_query, list_workspaces, run_action, simple_query};
pub use session::{encode_config, validate_blob, validate_config};
