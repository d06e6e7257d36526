//! Thin `env_logger` initialization, replacing the original's
//! `printf("#SYSCALL: ...")`/`printf("@->: ...")` trace pairs with
//! structured `log` records. Controlled by `RUST_LOG` (defaults to `info`).

pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
