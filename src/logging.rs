use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env, Target};

/// Install the process logger: `info` unless `RUST_LOG` says otherwise, each line stamped with
/// local time the way the bench logs have always looked.
pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {:<5} {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}

/// Logger for tests; output is captured per test and repeated calls are harmless.
pub fn init_test() {
    let _ = Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
