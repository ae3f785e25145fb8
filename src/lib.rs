//! # Seriallink
//!
//! A playbook engine for automating device consoles.
//!
//! Seriallink drives an interactive text session over a character transport
//! (usually a serial console reached through `picocom`, `screen` or `ssh`): it
//! logs in, sends commands, waits for expected text or the device prompt,
//! branches on what the device printed, and reports progress. Output is cleaned
//! of terminal escape sequences, echoes and pagination prompts before anything
//! is matched against it.
//!
//! ## Quick start
//!
//! ```
//! use seriallink::{Executor, RunOptions, ScriptedTransport, parse_str};
//!
//! #[tokio::main]
//! async fn main() {
//!     let playbook = parse_str(r#"
//! SEND "show version"
//! WAIT PROMPT
//! IF_CONTAINS "SN2700"
//!   SEND "show interfaces"
//!   WAIT PROMPT
//! ENDIF
//! SUCCESS "done"
//! "#).unwrap();
//!
//!     let mut device = ScriptedTransport::new()
//!         .on_line("show version", "Model: SN2700\nswitch# ")
//!         .on_line("show interfaces", "Eth1/1 up\nswitch# ");
//!
//!     let result = Executor::new(RunOptions::default())
//!         .run(&playbook, &mut device, None)
//!         .await;
//!     assert!(result.success);
//!     assert_eq!(result.detected_prompt.as_deref(), Some("switch# "));
//!     assert_eq!(result.custom_success_message.as_deref(), Some("done"));
//! }
//! ```
//!
//! Against real hardware, spawn the console program with [`PtyTransport`] and
//! build the options from a [`Config`]:
//!
//! ```no_run
//! use seriallink::{Config, Executor, PtyTransport, parse_file};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("seriallink.toml")?;
//!     let playbook = parse_file(config.playbook_path(None))?;
//!     let mut console = PtyTransport::spawn(
//!         "picocom",
//!         &["-b".to_string(), "115200".to_string(), "/dev/ttyUSB0".to_string()],
//!     )?;
//!     let result = Executor::new(config.run_options()?)
//!         .run(&playbook, &mut console, config.credentials().as_ref())
//!         .await;
//!     println!("{}", result.success_message());
//!     Ok(())
//! }
//! ```
//!
//! ## Playbook syntax
//!
//! One instruction per line. Keywords are case-insensitive; arguments may be
//! wrapped in `"…"` or `'…'`.
//!
//! | Instruction | Description |
//! |-------------|-------------|
//! | `SEND "text"` | Send a line to the device (no argument sends an empty line) |
//! | `WAIT "text"` | Wait until `text` appears in the output |
//! | `WAIT "text" 5s` | Same, with a per-step timeout (`ms` or `s`, floats allowed) |
//! | `WAIT PROMPT` | Wait for the detected prompt (or the configured fallback) |
//! | `PAUSE 1.5` | Sleep for a number of seconds |
//! | `IF_CONTAINS "x"` / `IF_NOT_CONTAINS "x"` | Test the last output for a substring |
//! | `IF_CONTAINS_I "x"` / `IF_NOT_CONTAINS_I "x"` | Case-insensitive variants |
//! | `IF_REGEX "re"` / `IF_NOT_REGEX "re"` | Case-insensitive regex search |
//! | `ELIF_…` | Same conditions, for later branches |
//! | `ELSE` / `ENDIF` | Close out a conditional group (groups nest) |
//! | `SUCCESS "message"` | Message to report when the run succeeds |
//! | `# comment` | Ignored; names the progress block that follows |
//!
//! ## Observing a run
//!
//! [`Executor::new`] reports progress through `tracing`. Pass any
//! `FnMut(&Event)` to [`Executor::with_handler`] to receive the [`Event`]s
//! yourself.
//!
//! ## Custom transports
//!
//! Implement [`Transport`] to drive something other than a PTY:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use seriallink::{Transport, TransportError};
//!
//! struct Loopback(Vec<u8>);
//!
//! #[async_trait(?Send)]
//! impl Transport for Loopback {
//!     async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
//!         self.0.extend_from_slice(data);
//!         Ok(())
//!     }
//!
//!     fn read_nonblocking(&mut self) -> Result<Vec<u8>, TransportError> {
//!         Ok(std::mem::take(&mut self.0))
//!     }
//!
//!     fn bytes_available(&mut self) -> bool {
//!         !self.0.is_empty()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//! }
//! ```

pub mod conditional;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod instruction;
pub mod login;
pub mod normalize;
pub mod pagination;
pub mod parser;
pub mod progress;
pub mod prompt;
pub mod session;
pub mod transport;

pub use conditional::{
    ConditionError, ConditionalEngine, ConditionalFrame, ControlFlowError, evaluate,
    find_matching_endif,
};
pub use config::{Config, ConfigError, DEFAULT_CONFIG_FILE};
pub use error::ErrorKind;
pub use events::{Event, EventSink, TracingSink};
pub use executor::{
    ExecutionContext, ExecutionResult, Executor, Failure, RunOptions, TimeoutPolicy,
};
pub use instruction::{Instruction, InstructionKind, Playbook};
pub use login::{Credentials, LoginProbe, LoginState};
pub use normalize::{StreamNormalizer, normalize};
pub use pagination::PaginationHandler;
pub use parser::{ParseError, parse_file, parse_lines, parse_str};
pub use prompt::PromptDetector;
pub use session::{Expectation, ReadOutcome, ReadState, SessionReader};
pub use transport::{PtyTransport, ScriptedTransport, Transport, TransportError};
