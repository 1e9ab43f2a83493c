//! Supporting utilities
//!
//! # Modules
//!
//! - [`path_validation`] - Keeping referenced scripts and playbooks inside the project root
//! - [`shell`] - Escaping and quoting for generated bash scripts

pub mod path_validation;
pub mod shell;

pub use path_validation::{contained_path, normalize_path, validate_project_path};
pub use shell::{escape_bash_env_value, single_quote};
