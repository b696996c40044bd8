//! Sandboxed command executor: a parser that guards against shell
//! injection, plus a spawner that enforces an allow-list, timeouts, and
//! environment scrubbing for child processes.
//!
//! The executor never shells out through `/bin/sh -c`; the parser in
//! [`parser`] is the entire defense against shell metacharacters reaching
//! a child process, so it runs before anything is spawned.

mod executor;
mod parser;

pub use executor::{ExecutionResult, SandboxConfig, SandboxError, SandboxExecutor};
pub use parser::{Command, ParseError};
