//! Pipeline assembly.
//!
//! Stages are stacked innermost first:
//!
//! ```text
//! source
//!   -> relative_to_absolute      (source coordinates)
//!   -> pause
//!   -> queued_commands           (jogs and macros flow while paused)
//!   -> relative_to_absolute      (injected coordinates)
//!   -> tool_change               (only with more than one extruder)
//!   -> baby_steps
//!   -> max_length                (when line splitting is enabled)
//!   -> wait_for_temp
//!   -> extrusion_multiplier
//!   -> feed_rate_multiplier
//! ```

use crate::baby_steps::BabySteps;
use crate::max_length::MaxLength;
use crate::multipliers::{ExtrusionMultiplier, FeedRateMultiplier};
use crate::pause::{PauseConfig, PauseControl, PauseHandling};
use crate::queued::{CommandQueue, QueuedCommands};
use crate::relative::RelativeToAbsolute;
use crate::stream::BoxedStream;
use crate::tool_change::{ToolChange, ToolChangeConfig};
use crate::wait_for_temp::{TemperatureReadings, WaitForTemp};
use gcodestream_core::{PipelineError, PrintRatios, Result};
use gcodestream_settings::PrinterSettings;
use std::time::Duration;

/// Side channels shared between a running pipeline and its controllers
#[derive(Debug, Clone)]
pub struct PipelineHandles {
    pub pause: PauseControl,
    pub queue: CommandQueue,
    pub ratios: PrintRatios,
    pub temperatures: TemperatureReadings,
}

impl PipelineHandles {
    /// Fresh handles with ratios taken from the printer defaults
    pub fn new(settings: &PrinterSettings) -> Self {
        Self {
            pause: PauseControl::new(),
            queue: CommandQueue::new(),
            ratios: PrintRatios::new(
                settings.print.feed_rate_ratio,
                settings.print.extrusion_ratio,
            ),
            temperatures: TemperatureReadings::new(),
        }
    }
}

impl Default for PipelineHandles {
    fn default() -> Self {
        Self::new(&PrinterSettings::default())
    }
}

/// Builds a pipeline from printer settings
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    settings: PrinterSettings,
    handles: PipelineHandles,
    initial_tool: Option<usize>,
}

impl PipelineBuilder {
    pub fn new(settings: PrinterSettings) -> Self {
        let handles = PipelineHandles::new(&settings);
        Self {
            settings,
            handles,
            initial_tool: None,
        }
    }

    /// Use existing handles instead of fresh ones
    pub fn with_handles(mut self, handles: PipelineHandles) -> Self {
        self.handles = handles;
        self
    }

    /// Tool known to be selected on the printer before the print starts
    pub fn with_initial_tool(mut self, tool: usize) -> Self {
        self.initial_tool = Some(tool);
        self
    }

    /// Enable or disable move splitting
    pub fn with_line_splitting(mut self, enabled: bool) -> Self {
        self.settings.motion.enable_line_splitting = enabled;
        self
    }

    /// Override the maximum segment length (mm)
    pub fn with_max_segment_length(mut self, max_segment_length: f64) -> Self {
        self.settings.motion.max_segment_length = max_segment_length;
        self
    }

    pub fn handles(&self) -> &PipelineHandles {
        &self.handles
    }

    pub fn settings(&self) -> &PrinterSettings {
        &self.settings
    }

    /// Stack every stage on top of `source`
    pub fn build(&self, source: BoxedStream) -> Result<BoxedStream> {
        let settings = &self.settings;
        let extruder_count = settings.extruders.count;

        if let Some(tool) = self.initial_tool {
            if tool >= extruder_count {
                return Err(PipelineError::ToolOutOfRange {
                    tool,
                    extruder_count,
                }
                .into());
            }
        }

        let mut stream: BoxedStream = Box::new(RelativeToAbsolute::new(source));

        stream = Box::new(PauseHandling::new(
            stream,
            self.handles.pause.clone(),
            PauseConfig {
                pause_gcode: settings.macros.pause_gcode.clone(),
                resume_gcode: settings.macros.resume_gcode.clone(),
                pause_layers: settings.print.pause_layers.clone(),
                travel_feed_rate: settings.motion.xy_travel_feed_rate,
                keep_alive: (settings.print.keep_alive_seconds > 0.0)
                    .then(|| Duration::from_secs_f64(settings.print.keep_alive_seconds)),
            },
        ));
        stream = Box::new(QueuedCommands::new(stream, self.handles.queue.clone()));
        stream = Box::new(RelativeToAbsolute::new(stream));

        if extruder_count > 1 {
            stream = Box::new(ToolChange::new(
                stream,
                ToolChangeConfig {
                    extruder_count,
                    offsets: settings.extruders.offsets.clone(),
                    macros: settings.macros.tool_changes.clone(),
                    xy_travel_feed_rate: settings.motion.xy_travel_feed_rate,
                    z_travel_feed_rate: settings.motion.z_travel_feed_rate,
                },
                self.initial_tool,
            )
            .with_temperatures(self.handles.temperatures.clone()));
        }

        stream = Box::new(BabySteps::new(
            stream,
            self.handles.ratios.baby_step_z.clone(),
        ));

        if settings.motion.enable_line_splitting {
            stream = Box::new(MaxLength::new(
                stream,
                settings.motion.max_segment_length,
                settings.motion.max_seconds_per_segment,
            ));
        }

        stream = Box::new(WaitForTemp::new(
            stream,
            self.handles.temperatures.clone(),
            Duration::from_secs_f64(settings.print.heater_hold_seconds),
        ));
        stream = Box::new(ExtrusionMultiplier::new(
            stream,
            self.handles.ratios.extrusion.clone(),
        ));
        stream = Box::new(FeedRateMultiplier::new(
            stream,
            self.handles.ratios.feed_rate.clone(),
        ));

        tracing::debug!("Built pipeline: {}", stream.debug_info());
        Ok(stream)
    }
}
