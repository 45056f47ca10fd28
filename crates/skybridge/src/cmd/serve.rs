use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use skybridge_bridge::{Bridge, BridgeEvent};
use skybridge_stream::{
    frame_buffer, CaptureProducer, DirectorySource, StreamEvent, StreamServer,
};
use skybridge_transport::event_channel;
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, ServeArgs};
use crate::config::GatewayConfig;
use crate::exit::{bridge_error, stream_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat};

const TICK: Duration = Duration::from_millis(50);
const CAPTURE_STATS_INTERVAL: Duration = Duration::from_secs(5);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = resolve_config(&args)?;
    let status_interval = parse_duration(&args.status_interval)?;
    let run_for = args.run_for.as_deref().map(parse_duration).transpose()?;

    let serial = config.serial_config();
    if serial.is_none() && !config.stream.enabled {
        return Err(CliError::new(
            USAGE,
            "nothing to serve: set a serial device or enable the stream",
        ));
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (bridge_sink, bridge_events) = event_channel();
    let bridge = match &serial {
        Some(serial) => Some(
            Bridge::open(serial, config.bridge_config(), bridge_sink)
                .map_err(|err| bridge_error("bridge startup failed", err))?,
        ),
        None => {
            warn!("no serial device configured, telemetry bridge disabled");
            None
        }
    };

    let (stream_sink, stream_events) = event_channel();
    let mut capture = None;
    let server = if config.stream.enabled {
        let (publisher, subscriber) = frame_buffer(config.frame_buffer_config());
        let server = StreamServer::start(config.stream_config(), subscriber, stream_sink)
            .map_err(|err| stream_error("stream startup failed", err))?;

        match &config.capture.dir {
            Some(dir) => {
                let source = DirectorySource::open(dir, config.capture.fps)
                    .map_err(|err| stream_error("capture setup failed", err))?;
                let producer = CaptureProducer::spawn(source, publisher, CAPTURE_STATS_INTERVAL)
                    .map_err(|err| stream_error("capture startup failed", err))?;
                capture = Some(producer);
            }
            None => info!("no frame source configured, stream stays empty"),
        }
        Some(server)
    } else {
        None
    };

    let started = Instant::now();
    let mut last_status = started;
    while running.load(Ordering::SeqCst) {
        drain_events(&bridge_events, &stream_events);

        if last_status.elapsed() >= status_interval {
            log_status(bridge.as_ref(), server.as_ref(), capture.as_ref());
            last_status = Instant::now();
        }
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        thread::sleep(TICK);
    }
    info!("shutting down");

    if let Some(capture) = capture {
        print_report("capture", &capture.stop(), format);
    }
    if let Some(server) = server {
        print_report("stream", &server.stop(), format);
    }
    if let Some(bridge) = bridge {
        print_report("bridge", &bridge.stop(), format);
    }
    drain_events(&bridge_events, &stream_events);

    Ok(SUCCESS)
}

fn resolve_config(args: &ServeArgs) -> CliResult<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };

    if let Some(serial) = &args.serial {
        config.serial.path = Some(serial.clone());
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(addr) = args.udp_bind {
        config.telemetry.bind = addr;
    }
    if let Some(max) = args.max_endpoints {
        config.telemetry.max_endpoints = max;
    }
    if let Some(addr) = args.http_bind {
        config.stream.bind = addr;
    }
    if let Some(max) = args.max_clients {
        config.stream.max_clients = max;
    }
    if args.no_stream {
        config.stream.enabled = false;
    }
    if let Some(dir) = &args.frames {
        config.capture.dir = Some(dir.clone());
    }
    if let Some(fps) = args.fps {
        config.capture.fps = fps;
    }
    Ok(config)
}

fn drain_events(bridge: &Receiver<BridgeEvent>, stream: &Receiver<StreamEvent>) {
    for event in bridge.try_iter() {
        debug!(?event, "bridge event");
    }
    for event in stream.try_iter() {
        debug!(?event, "stream event");
    }
}

fn log_status(
    bridge: Option<&Bridge>,
    server: Option<&StreamServer>,
    capture: Option<&CaptureProducer>,
) {
    if let Some(bridge) = bridge {
        let stats = bridge.stats();
        info!(
            state = %stats.state,
            endpoints = stats.endpoints,
            messages_received = stats.messages_received,
            messages_forwarded = stats.messages_forwarded,
            parse_errors = stats.parse_errors,
            "bridge status"
        );
    }
    if let Some(server) = server {
        let stats = server.stats();
        info!(
            viewers = stats.active_clients,
            frames_sent = stats.frames_sent,
            rejected = stats.rejected,
            "stream status"
        );
    }
    if let Some(capture) = capture {
        if !capture.is_running() {
            warn!("capture producer stopped");
        }
    }
}
