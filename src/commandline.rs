use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use redodobms_lib::protocol::Command;
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Decode hex encoded frames in the given order, sharing one discharge state
    Decode {
        /// Frames as hex strings (e.g. "0000040113 55aa17"), whitespace is ignored
        #[arg(required = true)]
        frames: Vec<String>,
    },
    /// Decode a capture file with one hex encoded frame per line ('#' starts a comment)
    Replay {
        /// The capture file
        file: PathBuf,
    },
    /// Wrap a hex encoded payload with preamble, length byte and checksum
    Frame {
        /// The payload as hex string
        payload: String,
    },
    /// Print the bytes of a command
    Command {
        #[arg(value_enum)]
        command: CommandKind,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum CommandKind {
    /// Request a status frame
    Poll,
    /// Switch the discharge relay on
    EnableDischarge,
    /// Switch the discharge relay off
    DisableDischarge,
}

impl From<CommandKind> for Command {
    fn from(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Poll => Command::Poll,
            CommandKind::EnableDischarge => Command::EnableDischarge,
            CommandKind::DisableDischarge => Command::DisableDischarge,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Debug,
    Json,
    Yaml,
}

const fn about_text() -> &'static str {
    "redodo bms frame inspection tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Output format for decoded frames
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Debug)]
    pub format: OutputFormat,

    /// Do not add calculated values (power, runtime, ...) to decoded frames
    #[arg(long, global = true)]
    pub no_calculated: bool,
}
