// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

use std::fs::File;

use simplelog::{Config, LevelFilter, SimpleLogger, WriteLogger};

#[used]
#[cfg_attr(target_os = "linux", unsafe(link_section = ".init_array"))]
pub static INITIALIZE: extern "C" fn() = ccatok_log_init;

fn level_from_env() -> LevelFilter {
    match std::env::var("CCATOK_TRACE_LEVEL") {
        Err(_) => LevelFilter::Error,
        Ok(l) => match l.as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Trace,
        },
    }
}

/// Initializes HSM call tracing from the environment.
///
/// CCATOK_TRACE selects the destination:
/// - stdout -> logs to standard output
/// - file -> any other value is interpreted as a file name to log into
/// - NOT PRESENT -> No tracing is initialized
///
/// CCATOK_TRACE_LEVEL selects the level, one of off, error, warn, info,
/// debug or trace. It defaults to LevelFilter::Error and any unknown
/// value selects LevelFilter::Trace.
///
/// Failing HSM verbs are traced at error level together with their
/// return and reason codes, successful verbs that carry a reason code
/// are traced at warn level.
#[unsafe(no_mangle)]
pub extern "C" fn ccatok_log_init() {
    let level = level_from_env();
    let Ok(target) = std::env::var("CCATOK_TRACE") else {
        return;
    };
    match target.as_str() {
        "stdout" => {
            let _ = SimpleLogger::init(level, Config::default());
        }
        file_name => {
            let file = match File::create(file_name) {
                Ok(w) => w,
                Err(_) => return,
            };
            let _ = WriteLogger::init(level, Config::default(), file);
        }
    }
}

#[test]
pub fn test_init() {
    ccatok_log_init();
}
