mod commandline;

use anyhow::{bail, Context, Result};
use clap::Parser;
use commandline::{CliArgs, CliCommands, OutputFormat};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use redodobms_lib::bms::{BmsProtocol, DischargeTracker};
use redodobms_lib::protocol::{self, Command};
use redodobms_lib::redodo::Redodo;
use redodobms_lib::sample::Sample;
use serde_json::json;
use std::{ops::Deref, panic};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::decode(&cleaned).with_context(|| format!("Invalid hex string '{input}'"))
}

/// Decodes frames of one device, in order.
struct FrameDecoder {
    tracker: DischargeTracker,
    format: OutputFormat,
    calculated: bool,
}

impl FrameDecoder {
    fn new(args: &CliArgs) -> Self {
        Self {
            tracker: DischargeTracker::new(),
            format: args.format,
            calculated: !args.no_calculated,
        }
    }

    fn process(&mut self, label: &str, hex_frame: &str) -> Result<()> {
        let buffer = parse_hex(hex_frame)?;
        match Redodo.validate(&buffer) {
            Ok(frame) => {
                let mut sample = Redodo.decode(&frame, &mut self.tracker);
                if self.calculated {
                    sample.add_calculated(Redodo.calc_values());
                }
                if sample.is_empty() {
                    warn!("{label}: no field inside the frame");
                }
                self.print(label, &sample)
            }
            Err(err) => {
                warn!("{label}: frame discarded ({err})");
                Ok(())
            }
        }
    }

    fn print(&self, label: &str, sample: &Sample) -> Result<()> {
        match self.format {
            OutputFormat::Debug => println!("{label}: {sample}"),
            OutputFormat::Json | OutputFormat::Yaml => {
                let record = json!({
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "frame": label,
                    "sample": sample,
                });
                if self.format == OutputFormat::Json {
                    println!(
                        "{}",
                        serde_json::to_string(&record)
                            .with_context(|| "Cannot serialize sample to JSON")?
                    );
                } else {
                    print!(
                        "---\n{}",
                        serde_yaml::to_string(&record)
                            .with_context(|| "Cannot serialize sample to YAML")?
                    );
                }
            }
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    match &args.command {
        CliCommands::Decode { frames } => {
            let mut decoder = FrameDecoder::new(&args);
            for (idx, hex_frame) in frames.iter().enumerate() {
                decoder
                    .process(&format!("frame {}", idx + 1), hex_frame)
                    .with_context(|| format!("Cannot decode frame {}", idx + 1))?;
            }
        }
        CliCommands::Replay { file } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Cannot read capture file {file:?}"))?;
            let mut decoder = FrameDecoder::new(&args);
            for (idx, line) in content.lines().enumerate() {
                let line = line.split('#').next().unwrap_or_default().trim();
                if line.is_empty() {
                    continue;
                }
                decoder
                    .process(&format!("line {}", idx + 1), line)
                    .with_context(|| format!("Cannot decode line {} of {file:?}", idx + 1))?;
            }
        }
        CliCommands::Frame { payload } => {
            let payload = parse_hex(payload)?;
            let Some(frame) = protocol::build_frame(&payload) else {
                bail!(
                    "Payload of {} bytes does not fit into one frame",
                    payload.len()
                );
            };
            println!("{}", hex::encode_upper(frame));
        }
        CliCommands::Command { command } => {
            let command = Command::from(*command);
            info!("{command}");
            println!("{}", hex::encode_upper(command.bytes()));
        }
    }

    Ok(())
}
