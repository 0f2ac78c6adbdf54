use spinet_frame::decode_and_validate;

use crate::cmd::{Context, DecodeArgs, FrameReport};
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_raw, print_report, OutputFormat};

pub fn run(args: DecodeArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.frame_config(args.envelope_len)?;
    let raw = args.input.resolve_or_stdin()?;

    let frame = decode_and_validate(&raw, &config).map_err(|err| frame_error("invalid frame", err))?;

    if ctx.format == OutputFormat::Raw {
        print_raw(frame.payload());
        return Ok(SUCCESS);
    }

    print_report(
        &FrameReport::new(&config, frame.header(), &raw, frame.payload()),
        ctx.format,
    );
    Ok(SUCCESS)
}
