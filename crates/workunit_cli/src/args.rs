//! Hand-rolled argument parsing for the demo driver.

use std::fmt::{Display, Formatter};

pub const DEFAULT_DB_PATH: &str = "workunit.db";
pub const DEFAULT_NAME: &str = "Ada Lovelace";
pub const DEFAULT_FIRST_AMOUNT: f64 = 99.95;
pub const DEFAULT_SECOND_AMOUNT: f64 = 149.50;
pub const DEFAULT_THREADS: usize = 10;

pub const USAGE: &str = "usage:
  workunit_cli create [--db PATH] [--name NAME] [--email EMAIL] [--o1 AMOUNT] [--o2 AMOUNT]
  workunit_cli get <ID> [--db PATH]
  workunit_cli concurrent [--db PATH] [--n THREADS]";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create(CreateArgs),
    Get { db: String, id: i64 },
    Concurrent { db: String, threads: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateArgs {
    pub db: String,
    pub name: String,
    /// `None` means generate a unique address.
    pub email: Option<String>,
    pub first_amount: f64,
    pub second_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError(pub String);

impl Display for UsageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{USAGE}", self.0)
    }
}

impl std::error::Error for UsageError {}

/// Parses everything after the program name.
pub fn parse(args: &[String]) -> Result<Command, UsageError> {
    let Some((command, rest)) = args.split_first() else {
        return Err(UsageError("missing command".to_string()));
    };
    let mut flags = Flags::new(rest);

    let parsed = match command.as_str() {
        "create" => {
            let db = flags.take("--db")?;
            let name = flags.take("--name")?;
            let email = flags.take("--email")?;
            let first_amount = flags.take_amount("--o1")?;
            let second_amount = flags.take_amount("--o2")?;
            Command::Create(CreateArgs {
                db: db.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
                name: name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
                email,
                first_amount: first_amount.unwrap_or(DEFAULT_FIRST_AMOUNT),
                second_amount: second_amount.unwrap_or(DEFAULT_SECOND_AMOUNT),
            })
        }
        "get" => {
            let db = flags.take("--db")?;
            let raw_id = flags
                .positional()
                .ok_or_else(|| UsageError("get requires a customer id".to_string()))?;
            let id = raw_id
                .parse::<i64>()
                .map_err(|_| UsageError(format!("invalid id `{raw_id}`")))?;
            Command::Get {
                db: db.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
                id,
            }
        }
        "concurrent" => {
            let db = flags.take("--db")?;
            // Non-positive or unparsable counts fall back to the default.
            let threads = flags
                .take("--n")?
                .and_then(|raw| raw.parse::<usize>().ok())
                .filter(|threads| *threads > 0)
                .unwrap_or(DEFAULT_THREADS);
            Command::Concurrent {
                db: db.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
                threads,
            }
        }
        other => return Err(UsageError(format!("unknown command `{other}`"))),
    };

    flags.finish()?;
    Ok(parsed)
}

/// Remaining arguments, consumed flag by flag.
struct Flags {
    remaining: Vec<Option<String>>,
}

impl Flags {
    fn new(args: &[String]) -> Self {
        Self {
            remaining: args.iter().cloned().map(Some).collect(),
        }
    }

    fn take(&mut self, name: &str) -> Result<Option<String>, UsageError> {
        let Some(index) = self
            .remaining
            .iter()
            .position(|arg| arg.as_deref() == Some(name))
        else {
            return Ok(None);
        };
        self.remaining[index] = None;
        match self.remaining.get_mut(index + 1).and_then(Option::take) {
            Some(value) => Ok(Some(value)),
            None => Err(UsageError(format!("{name} requires a value"))),
        }
    }

    /// Missing, zero or unparsable amounts fall back to the default.
    fn take_amount(&mut self, name: &str) -> Result<Option<f64>, UsageError> {
        Ok(self
            .take(name)?
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|amount| *amount != 0.0))
    }

    fn positional(&mut self) -> Option<String> {
        self.remaining
            .iter_mut()
            .find(|arg| matches!(arg, Some(value) if !value.starts_with("--")))
            .and_then(Option::take)
    }

    fn finish(self) -> Result<(), UsageError> {
        match self.remaining.into_iter().flatten().next() {
            Some(extra) => Err(UsageError(format!("unexpected argument `{extra}`"))),
            None => Ok(()),
        }
    }
}
