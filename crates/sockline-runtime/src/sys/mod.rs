//! Platform syscall adapter
//!
//! Thin wrappers over the socket API. Every call returns the raw `Errno` on
//! failure; turning that into an [`ErrorKind`](sockline_core::ErrorKind) is
//! the job of [`errno::classify`], driven by the operation that failed.

pub mod errno;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    } else {
        compile_error!("Unsupported platform");
    }
}
