use std::fs;

use spinet_frame::{encode_envelope, FrameHeader};

use crate::cmd::{Context, EncodeArgs, FrameReport};
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_raw, print_report, OutputFormat};

pub fn run(args: EncodeArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.frame_config(args.envelope_len)?;
    let payload = args.payload.resolve()?.unwrap_or_default();

    let envelope =
        encode_envelope(&payload, &config).map_err(|err| frame_error("encode failed", err))?;
    tracing::debug!(
        payload_len = payload.len(),
        envelope_len = envelope.len(),
        "encoded envelope"
    );

    if let Some(path) = &args.out {
        fs::write(path, &envelope)
            .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
    }

    if ctx.format == OutputFormat::Raw {
        if args.out.is_none() {
            print_raw(&envelope);
        }
        return Ok(SUCCESS);
    }

    let header = FrameHeader::parse(&envelope).map_err(|err| frame_error("encode failed", err))?;
    print_report(
        &FrameReport::new(&config, &header, &envelope, &payload),
        ctx.format,
    );
    Ok(SUCCESS)
}
