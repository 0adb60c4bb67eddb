//! cgminer/bmminer API commands
//!
//! The set of commands rigscan issues is finite and listed here as
//! constructors. Anything else goes through [`Command::raw`].

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command name is empty")]
    EmptyName,
    #[error("Commands must be one or two parts, got {0}")]
    TooManyParts(usize),
}

/// One API request: a command name and at most one parameter string.
///
/// The parameter is opaque to the transport; multi-argument commands join
/// their arguments with commas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    parameter: Option<String>,
}

/// Wire form of a request
#[derive(Serialize)]
struct Request<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter: Option<&'a str>,
}

impl Command {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameter: None,
        }
    }

    /// Escape hatch for commands without a dedicated constructor
    pub fn raw(name: impl Into<String>, parameter: Option<String>) -> Self {
        Self {
            name: name.into(),
            parameter,
        }
    }

    /// Join positional arguments with commas into the single parameter
    pub fn with_args<S: AsRef<str>>(name: impl Into<String>, args: &[S]) -> Self {
        let parameter = if args.is_empty() {
            None
        } else {
            Some(
                args.iter()
                    .map(|a| a.as_ref())
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };
        Self::raw(name, parameter)
    }

    /// Parse the `name|parameter` shorthand
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let parts: Vec<&str> = input.split('|').collect();
        match parts.as_slice() {
            [""] | ["", _] => Err(CommandError::EmptyName),
            [name] => Ok(Self::named(name)),
            [name, parameter] => Ok(Self::raw(*name, Some(parameter.to_string()))),
            _ => Err(CommandError::TooManyParts(parts.len())),
        }
    }

    pub fn version() -> Self {
        Self::named("version")
    }

    pub fn stats() -> Self {
        Self::named("stats")
    }

    pub fn summary() -> Self {
        Self::named("summary")
    }

    pub fn pools() -> Self {
        Self::named("pools")
    }

    pub fn devs() -> Self {
        Self::named("devs")
    }

    pub fn config() -> Self {
        Self::named("config")
    }

    pub fn coin() -> Self {
        Self::named("coin")
    }

    pub fn lcd() -> Self {
        Self::named("lcd")
    }

    pub fn add_pool(url: &str, user: &str, password: &str) -> Self {
        Self::with_args("addpool", &[url, user, password])
    }

    pub fn remove_pool(index: u32) -> Self {
        Self::with_args("removepool", &[index.to_string()])
    }

    pub fn switch_pool(index: u32) -> Self {
        Self::with_args("switchpool", &[index.to_string()])
    }

    pub fn enable_pool(index: u32) -> Self {
        Self::with_args("enablepool", &[index.to_string()])
    }

    pub fn disable_pool(index: u32) -> Self {
        Self::with_args("disablepool", &[index.to_string()])
    }

    /// Reboot the device
    pub fn restart() -> Self {
        Self::named("restart")
    }

    /// Soft reset the mining process
    pub fn reset() -> Self {
        Self::named("reset")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter(&self) -> Option<&str> {
        self.parameter.as_deref()
    }

    /// Whether replies to this command may contain back-to-back objects
    /// (`}{`) that need a comma inserted before they decode.
    pub fn repairs_concatenation(&self) -> bool {
        self.name == "stats"
    }

    /// Encode as the JSON request body
    pub fn to_request(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Request {
            command: &self.name,
            parameter: self.parameter.as_deref(),
        })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parameter {
            Some(parameter) => write!(f, "{}|{}", self.name, parameter),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn request_json(command: &Command) -> Value {
        serde_json::from_slice(&command.to_request().unwrap()).unwrap()
    }

    #[test]
    fn test_request_without_parameter() {
        let value = request_json(&Command::stats());
        assert_eq!(value, json!({"command": "stats"}));
        assert!(value.get("parameter").is_none());
    }

    #[test]
    fn test_request_with_parameter() {
        let value = request_json(&Command::add_pool("url", "user", "pass"));
        assert_eq!(value, json!({"command": "addpool", "parameter": "url,user,pass"}));
    }

    #[test]
    fn test_with_args_empty() {
        let command = Command::with_args::<&str>("summary", &[]);
        assert_eq!(command.parameter(), None);
        assert_eq!(command, Command::summary());
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("stats"), Ok(Command::stats()));
        assert_eq!(Command::parse("removepool|0"), Ok(Command::remove_pool(0)));
        assert_eq!(Command::parse("a|b|c"), Err(CommandError::TooManyParts(3)));
        assert_eq!(Command::parse(""), Err(CommandError::EmptyName));
        assert_eq!(Command::parse("|x"), Err(CommandError::EmptyName));
    }

    #[test]
    fn test_display_round_trips_shorthand() {
        let command = Command::add_pool("stratum+tcp://p:3333", "acct.w1", "x");
        assert_eq!(command.to_string(), "addpool|stratum+tcp://p:3333,acct.w1,x");
        assert_eq!(Command::parse(&command.to_string()), Ok(command));
    }

    #[test]
    fn test_only_stats_repairs() {
        assert!(Command::stats().repairs_concatenation());
        assert!(!Command::summary().repairs_concatenation());
        assert!(!Command::pools().repairs_concatenation());
    }
}
