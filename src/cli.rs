//! Command-line argument parsing.
//!
//! Mirrors the original `assert(argc > 2 && argc < 6)` grammar: the last
//! argument is always the backing-file path, and everything before it is
//! mount configuration forwarded to the host bridge (the original passed
//! that remainder straight through to `fuse_main`, which parsed the
//! mountpoint and `-f`/`-o` itself; `fuser` does not, so this module does
//! that part).

use std::env::ArgsOs;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::exit;

pub struct Config {
    pub image_path: PathBuf,
    pub mountpoint: PathBuf,
    pub foreground: bool,
    pub options: Vec<String>,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(" nufs [-f] [-o opt,opt,...] <mountpoint> <image-path>");
    eprintln!();
    eprintln!("Options:");
    eprintln!(" -f:\t\tstay attached to the terminal instead of daemonizing");
    eprintln!(" -o <opts>:\tcomma-separated mount options forwarded to the host kernel");
}

pub fn parse(args: ArgsOs) -> Config {
    let args: Vec<OsString> = args.collect();
    if !(args.len() > 2 && args.len() < 6) {
        print_usage();
        exit(1);
    }

    let mut args = args;
    let image_path = PathBuf::from(args.pop().expect("checked non-empty above"));

    let mut foreground = false;
    let mut options = Vec::new();
    let mut mountpoint = None;
    let mut rest = args.into_iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.to_str() {
            Some("-f") | Some("--foreground") => foreground = true,
            Some("-o") => {
                let Some(opts) = rest.next() else {
                    print_usage();
                    exit(1);
                };
                options.extend(opts.to_string_lossy().split(',').map(str::to_string));
            }
            _ => mountpoint = Some(PathBuf::from(arg)),
        }
    }

    let Some(mountpoint) = mountpoint else {
        print_usage();
        exit(1);
    };

    Config {
        image_path,
        mountpoint,
        foreground,
        options,
    }
}
