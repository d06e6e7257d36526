mod bridge;
mod cli;
mod logging;

use std::env;
use std::process::exit;

use log::info;
use nufs::Engine;

use bridge::Bridge;

fn main() {
    logging::init();

    let config = cli::parse(env::args_os());

    if !config.foreground {
        // SAFETY: called once, before any threads (fuser's session loop)
        // are spawned.
        if unsafe { libc::daemon(1, 0) } != 0 {
            eprintln!("nufs: failed to daemonize: {}", std::io::Error::last_os_error());
            exit(1);
        }
    }

    let engine = match Engine::mount(&config.image_path) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("nufs: {}: {e}", config.image_path.display());
            exit(1);
        }
    };
    info!(
        "mounted {} at {}",
        config.image_path.display(),
        config.mountpoint.display()
    );

    let mut options = vec![fuser::MountOption::FSName("nufs".to_string())];
    for opt in &config.options {
        match opt.as_str() {
            "ro" => options.push(fuser::MountOption::RO),
            "rw" => options.push(fuser::MountOption::RW),
            "allow_other" => options.push(fuser::MountOption::AllowOther),
            "allow_root" => options.push(fuser::MountOption::AllowRoot),
            "auto_unmount" => options.push(fuser::MountOption::AutoUnmount),
            other => log::warn!("ignoring unrecognized mount option: {other}"),
        }
    }

    let bridge = Bridge::new(engine);
    if let Err(e) = fuser::mount2(bridge, &config.mountpoint, &options) {
        eprintln!("nufs: failed to mount at {}: {e}", config.mountpoint.display());
        exit(1);
    }
}
