//! # hidscript
//!
//! A DuckyScript engine and USB HID gadget session layer for rooted
//! Linux/Android hosts.
//!
//! hidscript turns a device with a USB device controller into a keyboard,
//! a mouse or both, and drives it from DuckyScript-style scripts. Gadgets are
//! provisioned through configfs from a long-lived elevated shell; keystrokes
//! and pointer movement go out as boot-protocol HID reports.
//!
//! ## Quick start
//!
//! ```no_run
//! use hidscript::{Config, GadgetController, Profile};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gadget = GadgetController::new(Config::load(None)?);
//!     gadget.refresh_status(true).await;
//!
//!     let profile = Profile::from_json(&serde_json::json!({
//!         "id": "desk-keyboard",
//!         "roleType": "keyboard",
//!     }))?;
//!     gadget.activate(&profile).await?;
//!
//!     let run = gadget.execute_ducky_script("GUI r\nDELAY 300\nSTRINGLN notepad\n", 1.0, None);
//!     run.task.await?;
//!     gadget.deactivate().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Estimating without a device
//!
//! [`estimate_duration_ms`] runs the same interpreter against a
//! [`DurationModel`] and only adds up time:
//!
//! ```
//! use async_trait::async_trait;
//! use hidscript::{DurationModel, estimate_duration_ms};
//! use std::sync::Arc;
//!
//! struct TenMsPerKey;
//!
//! #[async_trait]
//! impl DurationModel for TenMsPerKey {
//!     async fn key_tap_ms(&self) -> u64 { 10 }
//!     async fn type_string_ms(&self, text: &str, _delay: u64) -> u64 {
//!         10 * text.chars().count() as u64
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ms = estimate_duration_ms(Arc::new(TenMsPerKey), "STRING hi\nDELAY 50\nENTER\n", 1.0)
//!     .await
//!     .unwrap();
//! assert_eq!(ms, 80);
//! # }
//! ```
//!
//! ## Script syntax
//!
//! | Command | Description |
//! |---------|-------------|
//! | `STRING text` / `STRINGLN text` | Type text, optionally followed by Enter |
//! | `STRING` ... `END_STRING` | Type a block of lines |
//! | `DELAY ms` / `DEFAULT_DELAY ms` | Pause; the default applies after every command |
//! | `CTRL ALT DELETE`, `GUI r`, `ENTER` | Key taps and combinations |
//! | `HOLD` / `RELEASE` / `INJECT_MOD` | Keep keys or modifiers down |
//! | `MOUSE MOVE dx dy`, `MOUSE CLICK LEFT` | Pointer control |
//! | `VAR $x = 1`, `IF` / `WHILE` / `FUNCTION` | Variables and control flow |
//! | `TRY` / `CATCH` / `END_TRY` | Intercept device errors |
//! | `WAIT_FOR HOST_CONNECTED 5000` | Block on a device condition |
//! | `REM comment` | Comment |

pub mod backend;
pub mod cancel;
pub mod clock;
pub mod command;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod expr;
pub mod gadget;
pub mod hid;
pub mod parser;
pub mod preprocess;
pub mod privileged;

pub use backend::{ActionBackend, DeviceBackend, DurationModel, EstimateBackend, WaitTarget, estimate_duration_ms};
pub use cancel::{CancelRegistry, CancelToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandKind};
pub use config::{Config, UnicodeFallback};
pub use engine::{Engine, RunOutcome};
pub use error::{DeviceError, ErrorCode, GadgetError, ScriptError, SessionError};
pub use event::{EventSink, ExecEvent, ExecEventKind};
pub use gadget::{GadgetController, GadgetParts, GadgetState, GadgetStatus, Profile, Role};
pub use parser::{parse_file, parse_str};
pub use preprocess::{Program, preprocess};
pub use privileged::{ExecResult, PrivilegedShell, RootChannel};
