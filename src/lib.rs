pub mod backend;
pub mod config;
pub mod error;
pub mod pgwire_server;
pub mod types;

// Test-only printing helper: expands to eprintln! in test and debug builds.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds tprintln! keeps format checking but emits nothing.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
