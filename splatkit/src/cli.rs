use clap::{Parser, Subcommand};

/// splatkit - turn a single image into a Gaussian splat with an isolated Python runtime
#[derive(Parser, Debug)]
#[command(name = "splatkit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the isolated Python environment
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Generate a splat PLY from an image
    Predict {
        /// Input image (png/jpg)
        #[arg(value_name = "IMAGE")]
        image: String,

        /// Output directory (default: $SPLATKIT_OUTPUT_DIR or ~/.splatkit/output)
        #[arg(long, short, value_name = "DIR")]
        output: Option<String>,

        /// Compute device: auto, cpu, cuda, mps or gpu (default: $SPLATKIT_DEVICE or auto)
        #[arg(long)]
        device: Option<String>,

        /// Use this checkpoint instead of the downloaded weights
        #[arg(long, short, value_name = "PATH")]
        checkpoint: Option<String>,

        /// Inference timeout in seconds, 0 for none (default: from env or 1800)
        #[arg(long)]
        timeout: Option<u64>,

        /// Pass -v to the inference CLI and print its output
        #[arg(long, short)]
        verbose: bool,

        /// Also write a .splat file next to the PLY
        #[arg(long)]
        splat: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a PLY carries the splat fields (reads the header only)
    Validate {
        #[arg(value_name = "PLY")]
        ply: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert a splat PLY to the 32-byte .splat format
    Convert {
        #[arg(value_name = "PLY")]
        ply: String,

        /// Output path (default: same name with .splat extension)
        #[arg(long, value_name = "PATH")]
        out: Option<String>,

        /// Also write a standard 3DGS PLY to PATH (may be the input, rewritten in place)
        #[arg(long = "ply", value_name = "PATH")]
        standard_ply: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum EnvAction {
    /// Report interpreter, package and checkpoint readiness
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Install or resume installing the environment
    Install,

    /// Remove the environment (model weights are kept)
    Clean {
        /// Show what would be removed without deleting
        #[arg(long)]
        dry_run: bool,

        /// Force removal without confirmation
        #[arg(long, short)]
        force: bool,
    },

    /// Print the resolved environment paths
    Path,
}
