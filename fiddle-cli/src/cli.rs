use clap::{Parser, ValueEnum};
use fiddle_core::tuning::NoteNaming;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fiddle", about = "Microphone tuner: prints the detected note as you play")]
pub struct Cli {
    /// Settings file (JSON). Missing fields take their defaults.
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Analyses per second
    #[arg(long)]
    pub analysis_rate: Option<u32>,

    /// Reference frequency for A4, in Hz
    #[arg(short, long)]
    pub reference: Option<f32>,

    /// Note naming
    #[arg(long, value_enum)]
    pub naming: Option<Naming>,

    /// Minimum window energy for a note to be shown
    #[arg(long)]
    pub min_volume: Option<f64>,

    /// Stop after this many seconds (runs until interrupted otherwise)
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Number of recent notes kept in the trace
    #[arg(long, default_value_t = 64)]
    pub history: usize,

    /// Print one line per sample instead of a status line
    #[arg(long)]
    pub verbose_trace: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Naming {
    /// A, A#, B, C...
    English,
    /// La, La#, Si, Do...
    French,
}

impl From<Naming> for NoteNaming {
    fn from(naming: Naming) -> Self {
        match naming {
            Naming::English => NoteNaming::English,
            Naming::French => NoteNaming::French,
        }
    }
}
