pub mod command;

pub use command::{CommandExecutor, RealCommandExecutor};

#[cfg(test)]
pub use command::MockCommandExecutor;
