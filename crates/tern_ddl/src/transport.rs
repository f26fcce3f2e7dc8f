//! Worker connection abstraction.
//!
//! A connection can have at most one command in flight. Parallel execution
//! dispatches on several connections with `send_command` and only then waits
//! on each with `await_completion`, so one session keeps many commands
//! outstanding without extra threads.

use tern_common::metadata::NodeKey;
use tern_common::TernResult;

pub trait WorkerConnection: Send {
    fn node(&self) -> &NodeKey;

    /// Dispatch a command without waiting for its result.
    fn send_command(&mut self, command: &str) -> TernResult<()>;

    /// Block until the dispatched command completes.
    fn await_completion(&mut self) -> TernResult<()>;

    fn execute(&mut self, command: &str) -> TernResult<()> {
        self.send_command(command)?;
        self.await_completion()
    }
}

pub trait WorkerTransport: Send + Sync {
    fn connect(&self, node: &NodeKey) -> TernResult<Box<dyn WorkerConnection>>;

    /// Send `commands` over a fresh connection as one uninterrupted sequence,
    /// outside any transaction block.
    fn execute_bare(&self, node: &NodeKey, commands: &[String]) -> TernResult<()> {
        let mut conn = self.connect(node)?;
        for command in commands {
            conn.execute(command)?;
        }
        Ok(())
    }
}
