//! The `convert-to-mobile` command: load, convert, save.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use model_io::{LoadError, ModelArtifact};
use tracing::{info, warn};

use crate::config::Optimization;
use crate::convert::{ConversionError, Converter};

pub const USAGE: &str = "Usage: convert-to-mobile <input_model_path> <output_model_path>";

/// Convert a SafeTensors model into the mobile format with default optimizations.
#[derive(Parser, Debug)]
#[command(name = "convert-to-mobile", version)]
pub struct Args {
    /// Serialized model to convert
    pub input: Option<PathBuf>,

    /// File to write the converted model to
    pub output: Option<PathBuf>,

    /// Ignored
    #[arg(hide = true)]
    pub extra: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("usage error: expected <input_model_path> <output_model_path>")]
    Usage,

    #[error("load error")]
    Load(#[from] LoadError),

    #[error("conversion error")]
    Conversion(#[from] ConversionError),

    #[error("write error: cannot write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write progress output")]
    Console(#[source] std::io::Error),
}

/// Check the arguments and run the conversion, reporting progress to `out`.
///
/// With fewer than two paths the usage line is written to `out` and
/// [`DriverError::Usage`] returned; nothing is read or written on disk.
pub fn run<W: Write>(args: &Args, out: &mut W) -> Result<(), DriverError> {
    let (input, output) = match (&args.input, &args.output) {
        (Some(input), Some(output)) => (input, output),
        _ => {
            writeln!(out, "{USAGE}").map_err(DriverError::Console)?;
            return Err(DriverError::Usage);
        }
    };
    if !args.extra.is_empty() {
        warn!(extra = ?args.extra, "ignoring extra arguments");
    }
    convert_file(input, output, out)
}

pub fn convert_file<W: Write>(input: &Path, output: &Path, out: &mut W) -> Result<(), DriverError> {
    writeln!(out, "Loading model from {}", input.display()).map_err(DriverError::Console)?;
    let model = ModelArtifact::load(input)?;
    info!(
        tensors = model.len(),
        parameters = model.parameter_count(),
        "model loaded"
    );

    let mut converter = Converter::from_model(&model);
    converter.config.optimizations = vec![Optimization::Default];

    writeln!(out, "Converting to mobile format...").map_err(DriverError::Console)?;
    let bytes = converter.convert()?;

    persist(output, &bytes)?;
    writeln!(out, "Saved mobile model to {}", output.display()).map_err(DriverError::Console)?;
    Ok(())
}

fn persist(path: &Path, bytes: &[u8]) -> Result<(), DriverError> {
    let write_err = |source| DriverError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut f = File::create(path).map_err(write_err)?;
    f.write_all(bytes).map_err(write_err)?;
    f.flush().map_err(write_err)?;
    Ok(())
}
