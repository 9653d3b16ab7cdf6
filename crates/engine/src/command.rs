//! Remote command construction.

use rigger_util::redact::redact_sensitive;
use rigger_util::shell::shell_line;
use serde::{Deserialize, Serialize};

/// A command to execute on the target host.
///
/// The structured `Argv` form quotes every element into a single shell
/// word and is the preferred way to carry values (domain names, user
/// names) into a command. The `Script` form passes author-written shell
/// text through verbatim; interpolating untrusted values into it is an
/// injection risk the plan author owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandLine {
    /// Verbatim shell text.
    Script(String),
    /// Program plus arguments, each quoted as one word.
    Argv {
        /// Program name or path.
        program: String,
        /// Arguments, treated as opaque values.
        args: Vec<String>,
    },
}

impl CommandLine {
    /// Build a verbatim shell command.
    pub fn script(text: impl Into<String>) -> Self {
        CommandLine::Script(text.into())
    }

    /// Build a structured command from a program and its arguments.
    pub fn argv(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        CommandLine::Argv {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The single line handed to the remote shell.
    pub fn to_shell(&self) -> String {
        match self {
            CommandLine::Script(text) => text.clone(),
            CommandLine::Argv { program, args } => shell_line(program, args),
        }
    }

    /// Redacted rendering safe for logs and error messages.
    pub fn describe(&self) -> String {
        redact_sensitive(&self.to_shell())
    }
}
