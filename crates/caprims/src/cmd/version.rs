use caprims_client::ContextConfig;

use crate::cmd::{Global, Session, VersionArgs};
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs, global: &Global) -> CliResult<i32> {
    if !args.extended {
        println!("caprims {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: caprims");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CAPRIMS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: libca={}, cli=true",
        cfg!(feature = "libca")
    );
    match Session::open(global, ContextConfig::default()) {
        Ok(session) => println!(
            "backend: {} ({})",
            session.ctx.backend(),
            session.ctx.version()
        ),
        Err(err) => println!("backend: unavailable ({err})"),
    }

    Ok(SUCCESS)
}
