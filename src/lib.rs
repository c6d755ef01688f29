//! # syscommand
//!
//! Run a child process and observe its standard streams as events.
//!
//! Output arrives in arbitrary chunks; each stream reassembles them into
//! logical lines and a rendered buffer that honours carriage returns the way a
//! terminal does, so progress bars rewriting one line show up as they would on
//! screen. A completion coordinator turns the three stream closures and the
//! exit status into a single success or failure outcome, decided exactly once
//! per execution.
//!
//! ```no_run
//! use syscommand::subprocess::{StreamName, SystemCommand};
//!
//! # async fn demo() -> syscommand::subprocess::Result<()> {
//! let cmd = SystemCommand::run_with("printf 'fetching\\r50%%\\r100%%\\n'", |cmd| {
//!     cmd.stdout().on_line(|line| println!("line: {line}"));
//!     cmd.on_success(|_| println!("done"));
//! })?;
//! cmd.wait().await?;
//! assert_eq!(cmd.output(StreamName::Stdout), "100%hing\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - `subprocess` - Command lifecycle, stream observation, builder and spawners
//! - `app` - Configuration, logging and error reporting for the binary
pub mod app;
pub mod subprocess;

pub use subprocess::{CommandBuilder, CommandConfig, CommandError, StreamName, SystemCommand};
