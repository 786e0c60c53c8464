//! CLI command implementations

/// Conditionally println based on silent mode
macro_rules! println_if {
    ($silent:expr) => {
        if !$silent {
            println!();
        }
    };
    ($silent:expr, $($arg:tt)*) => {
        if !$silent {
            println!($($arg)*);
        }
    };
}

pub mod config;
pub mod extract;
pub mod generate;
pub mod inspect;
pub mod partitions;
pub mod port;
pub mod verify;
