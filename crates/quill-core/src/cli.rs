use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{expand_command_abbrev, known_command_names};
use crate::config::Config;

/// Command line with `rc.key=value` words lifted out.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub args: Vec<OsString>,
    pub overrides: Vec<RcOverride>,
}

/// One `key=value` (or `key:value`) configuration override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcOverride {
    pub key: String,
    pub value: String,
}

impl RcOverride {
    fn split(raw: &str) -> Option<Self> {
        let (key, value) = raw.split_once('=').or_else(|| raw.split_once(':'))?;
        let key = key.trim().trim_start_matches("rc.");
        (!key.is_empty()).then(|| Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl std::str::FromStr for RcOverride {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::split(raw).ok_or_else(|| anyhow!("expected KEY=VALUE, got: {raw}"))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "quill",
    version,
    about = "Quill: tasks sorted by what needs doing today",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Less log output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// Override a configuration key, e.g. `--rc color=off`
    #[arg(long = "rc", value_name = "KEY=VALUE", action = ArgAction::Append)]
    pub overrides: Vec<RcOverride>,

    /// Configuration file to read instead of ~/.quillrc
    #[arg(long)]
    pub quillrc: Option<PathBuf>,

    /// Directory holding tasks.data
    #[arg(long)]
    pub data: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

/// Log level used when `RUST_LOG` is unset.
fn default_filter(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) | (0, 0) => "warn",
        (0, 1) => "info",
        (0, 2) => "debug",
        (0, 3..) => "trace",
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter(verbose, quiet))
            .map_err(|e| anyhow!("invalid log filter: {e}"))?,
    };

    let stderr = std::io::stderr();
    let ansi = stderr.is_terminal();
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .try_init()
    {
        debug!(error = %err, "tracing subscriber already installed");
    }

    Ok(())
}

/// Lift `rc.key=value` (or `rc.key:value`) words out of the argument list.
#[tracing::instrument(skip_all, fields(count = raw.len()))]
pub fn preprocess_args(raw: &[OsString]) -> Preprocessed {
    let (overrides, args): (Vec<_>, Vec<_>) = raw
        .iter()
        .enumerate()
        .map(|(idx, arg)| {
            let lifted = (idx > 0)
                .then(|| arg.to_str())
                .flatten()
                .filter(|text| text.starts_with("rc."))
                .and_then(RcOverride::split);
            (lifted, arg)
        })
        .partition(|(lifted, _)| lifted.is_some());

    let overrides: Vec<RcOverride> = overrides
        .into_iter()
        .filter_map(|(lifted, _)| lifted)
        .collect();
    for rc in &overrides {
        debug!(key = %rc.key, value = %rc.value, "captured positional rc override");
    }

    Preprocessed {
        args: args.into_iter().map(|(_, arg)| arg.clone()).collect(),
        overrides,
    }
}

/// A resolved command line: `quill [target] <command> [args...]`.
///
/// The target is a task id or id prefix given before the command, as in
/// `quill 3f2a done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub target: Option<String>,
    pub command: String,
    pub args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        let known = known_command_names();

        let Some(first) = tokens.first() else {
            let command = cfg.default_command().to_string();
            debug!(command = %command, "no explicit command, using default");
            let command = expand_command_abbrev(&command, &known)
                .ok_or_else(|| anyhow!("default.command '{command}' is not a command"))?;
            return Ok(Self {
                target: None,
                command: command.to_string(),
                args: vec![],
            });
        };

        if let Some(command) = expand_command_abbrev(first, &known) {
            debug!(token = %first, expanded = %command, "resolved command token");
            return Ok(Self {
                target: None,
                command: command.to_string(),
                args: tokens[1..].to_vec(),
            });
        }

        match tokens.get(1).and_then(|tok| expand_command_abbrev(tok, &known)) {
            Some(command) => {
                debug!(task = %first, command, "resolved targeted command");
                Ok(Self {
                    target: Some(first.clone()),
                    command: command.to_string(),
                    args: tokens[2..].to_vec(),
                })
            }
            None if tokens.len() == 1 => {
                debug!(task = %first, "lone token interpreted as task info query");
                Ok(Self {
                    target: Some(first.clone()),
                    command: "info".to_string(),
                    args: vec![],
                })
            }
            None => Err(anyhow!("unknown command: {first}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(words: &[&str]) -> Vec<OsString> {
        words.iter().map(OsString::from).collect()
    }

    #[test]
    fn rc_words_become_overrides() {
        let pre = preprocess_args(&os(&["quill", "rc.color=off", "list", "rc.calendar.days:3"]));
        assert_eq!(pre.args, os(&["quill", "list"]));
        let keys: Vec<(&str, &str)> = pre
            .overrides
            .iter()
            .map(|rc| (rc.key.as_str(), rc.value.as_str()))
            .collect();
        assert_eq!(keys, vec![("color", "off"), ("calendar.days", "3")]);
    }

    #[test]
    fn flag_overrides_parse_through_clap() {
        let cli = GlobalCli::parse_from(["quill", "--rc", "sync.rollback=off", "-vv", "list"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.overrides,
            vec![RcOverride {
                key: "sync.rollback".to_string(),
                value: "off".to_string(),
            }]
        );
        assert_eq!(cli.rest, os(&["list"]));
        assert!("novalue".parse::<RcOverride>().is_err());
    }

    #[test]
    fn verbosity_maps_to_filter() {
        assert_eq!(default_filter(0, 0), "warn");
        assert_eq!(default_filter(2, 0), "debug");
        assert_eq!(default_filter(3, 1), "warn");
        assert_eq!(default_filter(0, 2), "error");
    }

    #[test]
    fn commands_resolve_with_and_without_target() {
        let cfg = Config::default();
        let plain = Invocation::parse(&cfg, os(&["ad", "Buy", "milk"])).expect("add");
        assert_eq!(plain.command, "add");
        assert_eq!(plain.args, vec!["Buy", "milk"]);

        let targeted = Invocation::parse(&cfg, os(&["3f2a", "done"])).expect("done");
        assert_eq!(targeted.target.as_deref(), Some("3f2a"));
        assert_eq!(targeted.command, "done");

        let lone = Invocation::parse(&cfg, os(&["3f2a"])).expect("info");
        assert_eq!(lone.command, "info");
    }

    #[test]
    fn empty_line_uses_default_command() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("default.command".to_string(), "cal".to_string())]);
        let inv = Invocation::parse(&cfg, vec![]).expect("default");
        assert_eq!(inv.command, "calendar");
        assert!(Invocation::parse(&cfg, os(&["what", "is", "this"])).is_err());
    }
}
