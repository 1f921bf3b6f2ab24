// Command line arguments

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Textured mesh viewer on raw Vulkan", long_about = None)]
pub struct Args {
    /// Wavefront OBJ model to display
    pub model: Option<PathBuf>,

    /// Image to sample as the model's texture
    pub texture: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Present mode override (immediate, mailbox, fifo, fifo_relaxed)
    #[arg(long)]
    pub present_mode: Option<String>,

    /// Disable the Khronos validation layer even in debug builds
    #[arg(long)]
    pub no_validation: bool,
}
