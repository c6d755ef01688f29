//! Error handling utilities

use crate::subprocess::CommandError;
use tracing::error;

/// Exit code used when the command could not be found
pub const EXIT_NOT_FOUND: i32 = 127;

/// Exit code for every other failure of the runner itself
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for a fatal error, looking through the error chain
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<CommandError>() {
        Some(CommandError::CommandNotFound(_)) => EXIT_NOT_FOUND,
        _ => EXIT_FAILURE,
    }
}

/// Report a fatal error and exit.
///
/// The error chain is printed when `verbose >= 1`.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);
    eprintln!("Error: {error}");

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code_for(&error))
}
