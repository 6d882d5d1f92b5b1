//! Invocation command capture

use std::borrow::Cow;
use std::ffi::OsString;

use crate::config::RunCommandConfig;

/// Longest value the tracking server accepts for a parameter
pub const MAX_PARAM_VALUE_LEN: usize = 500;

/// Characters that never need quoting in a POSIX shell word
fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c)
}

/// Quote one word for a POSIX shell
///
/// Safe words are returned as-is; anything else is wrapped in single quotes
/// with embedded single quotes written as `'"'"'`.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    if word.is_empty() {
        return Cow::Borrowed("''");
    }
    if word.chars().all(is_shell_safe) {
        return Cow::Borrowed(word);
    }
    Cow::Owned(format!("'{}'", word.replace('\'', "'\"'\"'")))
}

/// Join words into one shell command line
pub fn shell_join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| shell_quote(w.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Command line recorded for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand(String);

impl RunCommand {
    /// Command for the current process
    pub fn resolve(config: &RunCommandConfig) -> Self {
        Self::from_args(config, std::env::args_os())
    }

    /// Command for an explicit argv
    ///
    /// A configured command is used verbatim. Otherwise the arguments are
    /// quoted, `executable` (verbatim) replaces the first one, and `prefix`
    /// is prepended.
    pub fn from_args<I>(config: &RunCommandConfig, args: I) -> Self
    where
        I: IntoIterator<Item = OsString>,
    {
        if let Some(command) = &config.command {
            return Self(command.clone());
        }

        let mut args = args.into_iter().map(|a| a.to_string_lossy().into_owned());
        let program = args.next();
        let mut words = Vec::new();
        match (&config.executable, program) {
            (Some(executable), _) => words.push(executable.clone()),
            (None, Some(program)) => words.push(shell_quote(&program).into_owned()),
            (None, None) => {}
        }
        words.extend(args.map(|a| shell_quote(&a).into_owned()));

        let line = words.join(" ");
        match &config.prefix {
            Some(prefix) => Self(format!("{} {}", prefix, line)),
            None => Self(line),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value suitable for a tracking parameter
    pub fn as_param_value(&self) -> &str {
        match self.0.char_indices().nth(MAX_PARAM_VALUE_LEN) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for RunCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
