//! Kernel generator binary.
//!
//! Enumerates the supported shapes of one or all kernel families and writes
//! the generated routines to stdout or a file.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::{info, warn};

use metagen::enumerate::{self, Family};
use metagen::{GenOptions, GenerationSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FamilyArg {
    All,
    Zip,
    Mul,
    Qnt,
    Transform,
}

impl FamilyArg {
    fn families(self) -> Vec<Family> {
        match self {
            FamilyArg::All => Family::ALL.to_vec(),
            FamilyArg::Zip => vec![Family::Zip],
            FamilyArg::Mul => vec![Family::Mul],
            FamilyArg::Qnt => vec![Family::Qnt],
            FamilyArg::Transform => vec![Family::Transform],
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "metagen", about = "Generate ARMv7 NEON GEMM kernels")]
struct Args {
    /// Kernel family to generate.
    #[arg(long, value_enum, default_value_t = FamilyArg::All)]
    family: FamilyArg,

    /// Emit entry precondition asserts.
    #[arg(long)]
    checked: bool,

    /// Output file (stdout when omitted).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print kernel names only.
    #[arg(long)]
    list: bool,

    /// Print session statistics to stderr.
    #[arg(long)]
    stats: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let shapes: Vec<_> = args
        .family
        .families()
        .into_iter()
        .flat_map(Family::shapes)
        .collect();

    if args.list {
        for shape in &shapes {
            println!("{}", shape.name());
        }
        return Ok(());
    }

    let session = GenerationSession::new(GenOptions {
        checked: args.checked,
    });
    let set = enumerate::generate_all(&session, &shapes);
    for (shape, err) in &set.failures {
        warn!("{}: {err}", shape.name());
    }

    match &args.output {
        Some(path) => {
            fs::write(path, &set.text)?;
            info!("wrote {} kernels to {}", set.names.len(), path.display());
        }
        None => print!("{}", set.text),
    }

    if args.stats {
        eprint!("{}", session.stats());
    }

    if set.failures.is_empty() {
        Ok(())
    } else {
        Err(format!("{} kernels failed to generate", set.failures.len()).into())
    }
}
