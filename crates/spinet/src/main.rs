mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use spinet_endpoint::EndpointConfig;

use crate::cmd::{Command, Context};
use crate::exit::{endpoint_error, CliResult};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "spinet", version, about = "Ethernet-over-SPI link tools")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Endpoint configuration file (JSON).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn load_config(path: Option<&PathBuf>) -> CliResult<EndpointConfig> {
    let config = match path {
        Some(path) => EndpointConfig::from_json_file(path).map_err(|err| {
            endpoint_error(&format!("failed loading {}", path.display()), err)
        })?,
        None => EndpointConfig::default(),
    };
    config
        .validate()
        .map_err(|err| endpoint_error("invalid configuration", err))?;
    Ok(config)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let result = load_config(cli.config.as_ref()).and_then(|config| {
        let ctx = Context {
            format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
            config,
        };
        cmd::run(cli.command, &ctx)
    });

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_encode_subcommand() {
        let cli = Cli::try_parse_from(["spinet", "encode", "--data", "hello", "--envelope-len", "64"])
            .expect("encode args should parse");

        match cli.command {
            Command::Encode(args) => assert_eq!(args.envelope_len, Some(64)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from(["spinet", "encode", "--hex", "0102", "--data", "hello"])
            .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_loopback_with_global_flags() {
        let cli = Cli::try_parse_from([
            "spinet",
            "loopback",
            "-n",
            "3",
            "--bidirectional",
            "--format",
            "json",
            "--config",
            "/tmp/spinet.json",
        ])
        .expect("loopback args should parse");

        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/spinet.json")));
        match cli.command {
            Command::Loopback(args) => {
                assert_eq!(args.count, 3);
                assert!(args.bidirectional);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_peer_mac() {
        let err = Cli::try_parse_from(["spinet", "respond", "--peer-mac", "nope"])
            .expect_err("bad MAC should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = load_config(Some(&PathBuf::from("/nonexistent/spinet.json"))).unwrap_err();
        assert_ne!(err.code, 0);
    }
}
