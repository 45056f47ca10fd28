use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("skybridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: skybridge");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("SKYBRIDGE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: bridge={}, stream={}, cli=true",
        cfg!(feature = "bridge"),
        cfg!(feature = "stream")
    );
    println!(
        "defaults: telemetry_port={}, stream_port={}",
        skybridge_bridge::DEFAULT_TELEMETRY_PORT,
        skybridge_stream::DEFAULT_STREAM_PORT
    );

    Ok(SUCCESS)
}
