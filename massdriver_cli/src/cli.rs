//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "massdriver", version, about = "Mass driver controller CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/massdriver.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            Self::Current
        } else {
            Self::None
        }
    }
}

/// Real-time scheduling flags shared by the timing-sensitive commands.
#[derive(Args, Debug, Clone, Copy)]
pub struct RtOpts {
    /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on supported OSes.\n\nLinux: Attempts SCHED_FIFO priority, pins to one CPU, and calls mlockall to keep the process resident. Busy-wait pulse timing is much steadier this way, but it can starve other work and may need elevated privileges or ulimits (e.g., memlock).\n\nOther OSes: only mlockall is attempted."
    )]
    pub rt: bool,
    /// Real-time priority for SCHED_FIFO on Linux (1..=max)
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking mode for --rt: none, current, or all
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
    /// CPU index to pin the process to (Linux only, default 0)
    #[arg(long, value_name = "CPU")]
    pub rt_cpu: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Benchmark the busy-wait loop and report its calibration
    Calibrate {
        /// Length of one benchmark wait in microseconds
        #[arg(long, value_name = "US", default_value_t = 2000)]
        target_us: u64,
        /// Benchmark repetitions
        #[arg(long, value_name = "N", default_value_t = 50)]
        reps: u32,
        #[command(flatten)]
        rt: RtOpts,
    },
    /// Evaluate the series LCR discharge model
    Lcr {
        /// Coil inductance in henries
        #[arg(long, value_name = "H")]
        inductance: f64,
        /// Capacitor bank capacitance in farads
        #[arg(long, value_name = "F")]
        capacitance: f64,
        /// Total series resistance in ohms
        #[arg(long, value_name = "OHM")]
        resistance: f64,
        /// Initial capacitor voltage
        #[arg(long, value_name = "V")]
        voltage: f64,
        /// Integrate coil energy up to this time (µs); defaults to one damped period
        #[arg(long, value_name = "US")]
        until_us: Option<f64>,
    },
    /// Arm every stage and fire one projectile
    Shot {
        /// Simulated projectile speed (m/s)
        #[arg(long, value_name = "M_S", default_value_t = 20.0)]
        speed: f64,
        /// Simulated projectile length (mm)
        #[arg(long, value_name = "MM", default_value_t = 10.0)]
        length_mm: f64,
        /// Simulated distance between consecutive gates (mm)
        #[arg(long, value_name = "MM", default_value_t = 100.0)]
        spacing_mm: f64,
        /// Give up when the sequence has not completed after this long
        #[arg(long, value_name = "MS", default_value_t = 2000)]
        timeout_ms: u64,
        #[command(flatten)]
        rt: RtOpts,
    },
    /// Validate the config and construct every component
    SelfCheck,
}
