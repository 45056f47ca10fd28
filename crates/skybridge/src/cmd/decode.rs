use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::Serialize;
use skybridge_frame::{FrameError, FrameReader};
use tracing::debug;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_message, print_message_table, print_report, OutputFormat};

#[derive(Debug, Serialize)]
struct DecodeSummary {
    messages: u64,
    bad_checksums: u64,
    resyncs: u64,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let input: Box<dyn Read> = if args.path == Path::new("-") {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&args.path).map_err(|err| {
            io_error(&format!("failed to open {}", args.path.display()), err)
        })?;
        Box::new(file)
    };

    let mut reader = FrameReader::new(input);
    let mut table = Vec::new();
    let mut decoded = 0usize;

    loop {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => return Err(frame_error("decode failed", err)),
        };
        decoded += 1;

        if !args.summary {
            match format {
                OutputFormat::Table => table.push(message),
                _ => print_message(&message, format),
            }
        }

        if args.count.is_some_and(|count| decoded >= count) {
            break;
        }
    }

    if !table.is_empty() {
        print_message_table(&table);
    }

    let stats = reader.stats();
    debug!(
        messages = stats.messages,
        bad_checksums = stats.bad_checksums,
        resyncs = stats.resyncs,
        "decode finished"
    );

    if args.summary {
        let summary = DecodeSummary {
            messages: stats.messages,
            bad_checksums: stats.bad_checksums,
            resyncs: stats.resyncs,
        };
        print_report("decode", &summary, format);
    }

    if decoded == 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("no valid frames in {}", args.path.display()),
        ));
    }
    Ok(SUCCESS)
}
