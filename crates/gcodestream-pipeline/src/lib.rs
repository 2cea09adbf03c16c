//! # GCodeStream Pipeline
//!
//! A chain of G-code stream stages that sit between a print file and the
//! printer. Each stage pulls lines from the one below it, rewrites or injects
//! lines, and passes printer position reports back down.
//!
//! Use [`PrintSession`] to build the full chain from [`PrinterSettings`] and
//! control a running print (pause, resume, ratios, baby-stepping, queued
//! commands, cancel).
//!
//! [`PrinterSettings`]: gcodestream_settings::PrinterSettings

pub mod baby_steps;
pub mod builder;
pub mod max_length;
pub mod multipliers;
pub mod pause;
pub mod queued;
pub mod relative;
pub mod session;
pub mod source;
pub mod stream;
pub mod tool_change;
pub mod wait_for_temp;

pub use baby_steps::BabySteps;
pub use builder::{PipelineBuilder, PipelineHandles};
pub use max_length::{split_move, MaxLength};
pub use multipliers::{ExtrusionMultiplier, FeedRateMultiplier};
pub use pause::{PauseConfig, PauseControl, PauseHandling, PauseReason, PauseState};
pub use queued::{CommandQueue, QueuedCommands, HOST_WAIT_OK};
pub use relative::RelativeToAbsolute;
pub use session::PrintSession;
pub use source::{FileSource, MemorySource, ReadFailure};
pub use stream::{is_nop, macro_lines, BoxedStream, GcodeStream};
pub use tool_change::{ToolChange, ToolChangeConfig};
pub use wait_for_temp::{HeaterWait, TemperatureReadings, Temperatures, WaitForTemp};
