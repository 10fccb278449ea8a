use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tasklist",
    version,
    about = "Ordered task list backed by Postgres",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "tasklistrc", global = true)]
    pub tasklistrc: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the task table and its triggers.
    Init,

    /// Show tasks in display order.
    List {
        #[arg(long)]
        json: bool,
    },

    /// Append a task.
    Add {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Flip a task between open and done.
    Toggle { id: i64 },

    /// Replace a task's text.
    Rename {
        id: i64,

        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Remove a task.
    Delete { id: i64 },

    /// Move a task into another task's slot.
    Move { id: i64, target: i64 },

    /// Remove all completed tasks.
    Clear,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Subcommands whose trailing words are task text, taken verbatim.
const TEXT_COMMANDS: &[&str] = &["add", "rename"];

/// Global options that consume the following token as their value.
const VALUE_FLAGS: &[&str] = &["--rc", "--tasklistrc"];

/// Pulls positional `rc.key=value` / `rc.key:value` tokens out of argv
/// before clap sees them. Everything after `add`/`rename` or `--` is
/// left alone so task text can contain such words.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    let mut seen_command = false;
    let mut flag_value = false;
    while let Some(arg) = iter.next() {
        let s = arg.to_string_lossy().into_owned();
        if flag_value {
            flag_value = false;
            cleaned.push(arg);
            continue;
        }
        if s == "--" || (!seen_command && TEXT_COMMANDS.contains(&s.as_str())) {
            cleaned.push(arg);
            cleaned.extend(iter.by_ref());
            break;
        }
        if VALUE_FLAGS.contains(&s.as_str()) {
            flag_value = true;
            cleaned.push(arg);
            continue;
        }
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        if !s.starts_with('-') {
            seen_command = true;
        }
        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, preprocess_args};

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "tasklist",
            "rc.store.backend=memory",
            "list",
            "rc.color:off",
        ]))
        .unwrap();

        assert_eq!(pre.cleaned_args, args(&["tasklist", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.store.backend".to_string(), "memory".to_string()),
                ("rc.color".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn task_text_keeps_rc_lookalike_words() {
        let pre = preprocess_args(&args(&[
            "tasklist",
            "rc.color=off",
            "add",
            "rc.local=fix",
            "tonight",
        ]))
        .unwrap();
        assert_eq!(
            pre.cleaned_args,
            args(&["tasklist", "add", "rc.local=fix", "tonight"])
        );
        assert_eq!(
            pre.rc_overrides,
            vec![("rc.color".to_string(), "off".to_string())]
        );

        let pre = preprocess_args(&args(&[
            "tasklist",
            "--tasklistrc",
            "rename",
            "rc.store.table=chores",
        ]))
        .unwrap();
        assert_eq!(
            pre.cleaned_args,
            args(&["tasklist", "--tasklistrc", "rename"])
        );
        assert_eq!(pre.rc_overrides.len(), 1);

        let cli = GlobalCli::parse_from(
            preprocess_args(&args(&["tasklist", "rename", "2", "rc.x=y"]))
                .unwrap()
                .cleaned_args,
        );
        assert_eq!(
            cli.command,
            Some(Command::Rename {
                id: 2,
                text: vec!["rc.x=y".to_string()]
            })
        );
    }

    #[test]
    fn subcommands_parse_with_global_flags() {
        let cli = GlobalCli::parse_from(args(&[
            "tasklist", "-vv", "add", "buy", "oat", "milk",
        ]));
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.command,
            Some(Command::Add {
                text: vec!["buy".to_string(), "oat".to_string(), "milk".to_string()]
            })
        );

        let cli = GlobalCli::parse_from(args(&[
            "tasklist",
            "move",
            "3",
            "1",
            "--rc",
            "store.table=chores",
        ]));
        assert_eq!(cli.command, Some(Command::Move { id: 3, target: 1 }));
        assert_eq!(cli.rc_overrides[0].key, "store.table");
        assert_eq!(cli.rc_overrides[0].value, "chores");

        let cli = GlobalCli::parse_from(args(&["tasklist"]));
        assert_eq!(cli.command, None);
    }
}
