//! Mail and approval collaborators.

pub mod cli;
pub mod email;
pub mod imap;

pub use cli::CliApproval;
pub use email::{EmailChannel, EmailConfig};
