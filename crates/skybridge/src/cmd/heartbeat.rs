use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use skybridge_frame::{
    FrameWriter, Generation, Heartbeat, Parser, MAX_FRAME_LEN, MSG_ID_HEARTBEAT,
};
use skybridge_transport::is_timeout;
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, HeartbeatArgs};
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const RECV_POLL: Duration = Duration::from_millis(50);
const MAX_DATAGRAM_LEN: usize = 65_507;

pub fn run(args: HeartbeatArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let socket = UdpSocket::bind(args.bind).map_err(|err| io_error("bind failed", err))?;
    socket
        .set_read_timeout(Some(RECV_POLL))
        .map_err(|err| io_error("socket setup failed", err))?;

    let generation = if args.v1 {
        Generation::V1
    } else {
        Generation::V2
    };
    let mut writer = FrameWriter::new(
        Vec::with_capacity(MAX_FRAME_LEN),
        generation,
        args.system_id,
        args.component_id,
    );
    let payload = Heartbeat::gcs().encode();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(target_addr = %args.target, %generation, "sending ground station heartbeats");

    let mut parser = Parser::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let mut sent = 0usize;
    let mut received = 0u64;
    let mut next_beat = Instant::now();

    while running.load(Ordering::SeqCst) {
        if Instant::now() >= next_beat {
            if args.count.is_some_and(|count| sent >= count) {
                break;
            }
            let sequence = writer.next_sequence();
            writer
                .send(MSG_ID_HEARTBEAT, &payload)
                .map_err(|err| frame_error("encode failed", err))?;
            socket
                .send_to(writer.get_ref(), args.target)
                .map_err(|err| io_error("send failed", err))?;
            writer.get_mut().clear();
            sent += 1;
            next_beat += interval;
            debug!(sequence, "heartbeat sent");
        }

        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                for message in parser.feed_slice(&buf[..len]) {
                    received += 1;
                    if !args.quiet {
                        print_message(&message, format);
                    }
                    debug!(%from, message_id = message.message_id, "message received");
                }
            }
            Err(err) if is_timeout(&err) => {}
            Err(err) if err.kind() == std::io::ErrorKind::ConnectionRefused => {
                warn!(target_addr = %args.target, "bridge not reachable");
            }
            Err(err) => return Err(io_error("receive failed", err)),
        }
    }

    let stats = parser.stats();
    info!(
        sent,
        received,
        bad_checksums = stats.bad_checksums,
        "heartbeat session finished"
    );
    Ok(SUCCESS)
}
