pub mod startup;

pub use startup::{Outcome, StartupCommands, StartupContext, handle_startup_command};
