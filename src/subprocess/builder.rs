//! Shell command-line assembly

use std::fmt;

/// What to run: a shell line (executed through `sh -c`) or an argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Shell(String),
    Argv(Vec<String>),
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Shell(line) => f.write_str(line),
            CommandLine::Argv(argv) => f.write_str(&shell_words::join(argv)),
        }
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        CommandLine::Shell(line.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(line: String) -> Self {
        CommandLine::Shell(line)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(argv: Vec<String>) -> Self {
        CommandLine::Argv(argv)
    }
}

impl From<&CommandBuilder> for CommandLine {
    fn from(builder: &CommandBuilder) -> Self {
        builder.build()
    }
}

impl From<CommandBuilder> for CommandLine {
    fn from(builder: CommandBuilder) -> Self {
        builder.build()
    }
}

/// One element of a command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Shell-escaped unless it already starts with `-`
    Bare(String),
    /// `-x` for a single character, `--name` otherwise
    Flag(String),
    /// `-n value` for a single character, `--name=value` otherwise
    Option(String, String),
    /// Emitted verbatim
    RawToken(String),
}

impl Arg {
    pub fn bare(text: impl Into<String>) -> Self {
        Arg::Bare(text.into())
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Arg::Flag(name.into())
    }

    pub fn option(name: impl Into<String>, value: impl Into<String>) -> Self {
        Arg::Option(name.into(), value.into())
    }

    pub fn raw(token: impl Into<String>) -> Self {
        Arg::RawToken(token.into())
    }

    fn render(&self) -> String {
        match self {
            Arg::Bare(text) if text.trim().starts_with('-') => text.clone(),
            Arg::Bare(text) => shell_words::quote(text).into_owned(),
            Arg::Flag(name) => {
                let name = strip_dashes(name);
                if name.chars().count() == 1 {
                    format!("-{name}")
                } else {
                    format!("--{name}")
                }
            }
            Arg::Option(name, value) => {
                let name = strip_dashes(name);
                let value = shell_words::quote(value);
                if name.chars().count() == 1 {
                    format!("-{name} {value}")
                } else {
                    format!("--{name}={value}")
                }
            }
            Arg::RawToken(token) => token.clone(),
        }
    }
}

/// At most two leading dashes are dropped from option and flag names.
fn strip_dashes(name: &str) -> &str {
    let name = name.strip_prefix('-').unwrap_or(name);
    name.strip_prefix('-').unwrap_or(name)
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Bare(text.to_string())
    }
}

impl From<String> for Arg {
    fn from(text: String) -> Self {
        Arg::Bare(text)
    }
}

impl<N: Into<String>, V: Into<String>> From<(N, V)> for Arg {
    fn from((name, value): (N, V)) -> Self {
        Arg::Option(name.into(), value.into())
    }
}

/// Builds a single shell-safe command string.
///
/// The program is emitted as given; every following argument is rendered per
/// its [`Arg`] variant and separated by one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    program: String,
    args: Vec<Arg>,
}

impl CommandBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, A>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Self::new(program).args(args)
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn flag(self, name: &str) -> Self {
        self.arg(Arg::flag(name))
    }

    pub fn option(self, name: &str, value: &str) -> Self {
        self.arg(Arg::option(name, value))
    }

    pub fn raw(self, token: &str) -> Self {
        self.arg(Arg::raw(token))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    pub fn render(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.render());
        }
        line
    }

    pub fn build(&self) -> CommandLine {
        CommandLine::Shell(self.render())
    }
}

impl fmt::Display for CommandBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
