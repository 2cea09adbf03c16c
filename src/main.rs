use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gcodestream::{
    init_logging, list_ports, Connection, Emulator, PrintReport, PrintRunner, PrintSession,
    PrinterSettings, RunnerConfig, SerialConnection, BUILD_DATE, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gcodestream")]
#[command(about = "Stream G-code to 3D printers through a host-side processing pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a G-code file on a serial printer or the emulator
    Run {
        /// G-code file to print
        file: PathBuf,
        /// Printer settings file (.toml or .json)
        #[arg(short, long)]
        settings: Option<PathBuf>,
        /// Serial port (default: from settings)
        #[arg(short, long, conflicts_with = "emulate")]
        port: Option<String>,
        /// Baud rate (default: from settings)
        #[arg(short, long)]
        baud: Option<u32>,
        /// Print to the built-in emulated printer
        #[arg(long)]
        emulate: bool,
        /// Feed-rate ratio
        #[arg(long)]
        feed_ratio: Option<f64>,
        /// Extrusion ratio
        #[arg(long)]
        extrusion_ratio: Option<f64>,
        /// Maximum segment length in mm
        #[arg(long)]
        max_segment: Option<f64>,
    },
    /// Write the processed G-code to stdout without a printer
    Process {
        /// G-code file to process
        file: PathBuf,
        /// Printer settings file (.toml or .json)
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
    /// List serial ports that look like printers
    Ports,
    /// Write a default settings file
    InitSettings {
        /// Destination (default: the user configuration directory)
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;
    tracing::debug!("gcodestream {} (built {})", VERSION, BUILD_DATE);

    match cli.command {
        Commands::Run {
            file,
            settings,
            port,
            baud,
            emulate,
            feed_ratio,
            extrusion_ratio,
            max_segment,
        } => {
            let mut settings = load_settings(settings.as_deref())?;
            if let Some(ratio) = feed_ratio {
                settings.print.feed_rate_ratio = ratio;
            }
            if let Some(ratio) = extrusion_ratio {
                settings.print.extrusion_ratio = ratio;
            }
            if let Some(length) = max_segment {
                settings.motion.max_segment_length = length;
            }
            settings.validate()?;

            let session = Arc::new(
                PrintSession::from_file(&file, &settings)
                    .with_context(|| format!("Failed to open {}", file.display()))?,
            );

            let config = RunnerConfig {
                runout_sensor: settings.print.filament_runout_sensor,
                ..RunnerConfig::default()
            };
            let report = if emulate {
                print(Emulator::new(settings.extruders.count), session, config).await?
            } else {
                let port = port.unwrap_or_else(|| settings.connection.port.clone());
                if port.is_empty() {
                    bail!("No serial port given; use --port, --emulate or set connection.port");
                }
                let baud = baud.unwrap_or(settings.connection.baud_rate);
                let timeout = Duration::from_millis(settings.connection.timeout_ms);
                print(SerialConnection::open(&port, baud, timeout)?, session, config).await?
            };
            show_report(&report);
        }
        Commands::Process { file, settings } => {
            let settings = load_settings(settings.as_deref())?;
            let gcode = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            for line in gcodestream::dry_run(&gcode, &settings).await? {
                println!("{}", line);
            }
        }
        Commands::Ports => {
            let ports = list_ports()?;
            if ports.is_empty() {
                println!("No printer ports found");
            }
            for port in ports {
                match port.manufacturer {
                    Some(manufacturer) => {
                        println!("{}\t{} ({})", port.port_name, port.description, manufacturer)
                    }
                    None => println!("{}\t{}", port.port_name, port.description),
                }
            }
        }
        Commands::InitSettings { path, force } => {
            let path = match path {
                Some(path) => path,
                None => PrinterSettings::default_path()?,
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            PrinterSettings::default().save_to_file(&path)?;
            println!("Wrote default settings to {}", path.display());
        }
    }

    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<PrinterSettings> {
    let settings = match path {
        Some(path) => PrinterSettings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => PrinterSettings::load_or_default(&PrinterSettings::default_path()?)?,
    };
    Ok(settings)
}

/// Run the print, cancelling on Ctrl-C
async fn print<C: Connection + 'static>(
    connection: C,
    session: Arc<PrintSession>,
    config: RunnerConfig,
) -> Result<PrintReport> {
    let runner = PrintRunner::new(connection, session).with_config(config);
    let handle = runner.handle();
    let mut task = tokio::spawn(runner.run());

    let report = tokio::select! {
        result = &mut task => result??,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling print");
            handle.cancel();
            task.await??
        }
    };
    Ok(report)
}

fn show_report(report: &PrintReport) {
    let status = if report.cancelled { "Cancelled" } else { "Finished" };
    println!(
        "{} after {} lines in {:.1}s",
        status,
        report.lines_sent,
        report.duration.as_secs_f64()
    );
    if report.position_mismatches > 0 {
        println!(
            "{} position mismatch(es) after resume",
            report.position_mismatches
        );
    }
    for error in &report.firmware_errors {
        println!("Firmware: {}", error);
    }
}
