use std::io;
use std::process::Output;

#[cfg(test)]
use mockall::automock;

/// Abstraction over external command execution (dfu-util, bossac, etc.)
/// This allows mocking the flashing tools in tests.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Execute an external command with the given arguments and collect its output.
    fn execute(&self, program: &str, args: Vec<String>) -> io::Result<Output>;
}

/// Real implementation that delegates to std::process::Command
#[derive(Default)]
pub struct RealCommandExecutor;

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, program: &str, args: Vec<String>) -> io::Result<Output> {
        std::process::Command::new(program).args(&args).output()
    }
}
