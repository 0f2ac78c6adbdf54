use std::fs;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;
use spinet_endpoint::{EndpointConfig, MacAddr};
use spinet_frame::{FrameConfig, FrameHeader};

use crate::exit::{frame_error, io_error, CliError, CliResult, USAGE};
use crate::output::{hex_encode, parse_hex, payload_preview, OutputFormat, Report};

pub mod decode;
pub mod encode;
pub mod loopback;
pub mod respond;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode a payload into one envelope.
    Encode(EncodeArgs),
    /// Validate an envelope and print its payload.
    Decode(DecodeArgs),
    /// Run two endpoints over a simulated wire and report link statistics.
    Loopback(LoopbackArgs),
    /// Answer ARP and ICMP echo requests through a loopback transport.
    Respond(RespondArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug)]
pub struct Context {
    pub format: OutputFormat,
    pub config: EndpointConfig,
}

impl Context {
    /// Envelope geometry: a per-command override wins over the config file.
    pub fn frame_config(&self, envelope_len: Option<usize>) -> CliResult<FrameConfig> {
        let envelope_len = envelope_len.unwrap_or(self.config.envelope_len);
        FrameConfig::new(envelope_len).map_err(|err| frame_error("invalid envelope length", err))
    }
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, ctx),
        Command::Decode(args) => decode::run(args, ctx),
        Command::Loopback(args) => loopback::run(args, ctx),
        Command::Respond(args) => respond::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
}

impl PayloadArgs {
    /// The selected bytes, or `None` when no source was given.
    pub fn resolve(&self) -> CliResult<Option<Vec<u8>>> {
        if let Some(data) = &self.data {
            return Ok(Some(data.as_bytes().to_vec()));
        }
        if let Some(hex) = &self.hex {
            return parse_hex(hex)
                .map(Some)
                .map_err(|err| CliError::new(USAGE, format!("--hex: {err}")));
        }
        if let Some(path) = &self.file {
            return fs::read(path)
                .map(Some)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
        }
        Ok(None)
    }

    /// Like [`resolve`](Self::resolve), falling back to stdin.
    pub fn resolve_or_stdin(&self) -> CliResult<Vec<u8>> {
        if let Some(bytes) = self.resolve()? {
            return Ok(bytes);
        }
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|err| io_error("failed reading stdin", err))?;
        Ok(buf)
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Envelope size in bytes (default from config, 1524).
    #[arg(long)]
    pub envelope_len: Option<usize>,
    /// Also write the full envelope to this file.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    // Envelope bytes; stdin when no source is given.
    #[command(flatten)]
    pub input: PayloadArgs,
    /// Envelope size in bytes (default from config, 1524).
    #[arg(long)]
    pub envelope_len: Option<usize>,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Frames to send; 0 runs until Ctrl-C.
    #[arg(long, short = 'n', default_value_t = 10)]
    pub count: u64,
    /// Payload size in bytes (default: largest that fits).
    #[arg(long)]
    pub size: Option<usize>,
    /// Alternate the sending side on every frame.
    #[arg(long)]
    pub bidirectional: bool,
    /// Pause between frames (e.g. 10ms, 1s).
    #[arg(long)]
    pub interval: Option<String>,
    /// How long to wait for each delivery (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct RespondArgs {
    /// Address the responder answers for.
    #[arg(long, default_value = "192.168.2.2")]
    pub ip: Ipv4Addr,
    /// Address of the simulated host sending requests.
    #[arg(long, default_value = "192.168.2.1")]
    pub peer_ip: Ipv4Addr,
    /// Hardware address of the simulated host.
    #[arg(long, default_value = "a6:99:91:ad:9d:6f")]
    pub peer_mac: MacAddr,
    /// Echo requests to send after the ARP exchange.
    #[arg(long, short = 'n', default_value_t = 3)]
    pub count: u16,
    /// Echo request payload.
    #[arg(long, default_value = "spinet")]
    pub data: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Header fields and payload of one envelope.
#[derive(Debug, Serialize)]
pub struct FrameReport {
    pub envelope_len: usize,
    pub payload_len: usize,
    pub header_checksum: String,
    pub payload_checksum: String,
    pub header: String,
    pub payload: String,
}

impl FrameReport {
    pub fn new(config: &FrameConfig, header: &FrameHeader, raw: &[u8], payload: &[u8]) -> Self {
        Self {
            envelope_len: config.envelope_len(),
            payload_len: payload.len(),
            header_checksum: format!("0x{:02x}", header.header_checksum),
            payload_checksum: format!("0x{:02x}", header.payload_checksum),
            header: hex_encode(&raw[..raw.len().min(spinet_frame::OVERHEAD)]),
            payload: payload_preview(payload),
        }
    }
}

impl Report for FrameReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("envelope_len", self.envelope_len.to_string()),
            ("payload_len", self.payload_len.to_string()),
            ("header_checksum", self.header_checksum.clone()),
            ("payload_checksum", self.payload_checksum.clone()),
            ("header", self.header.clone()),
            ("payload", self.payload.clone()),
        ]
    }
}
