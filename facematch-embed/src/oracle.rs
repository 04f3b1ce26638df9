use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus};

use log::debug;
use thiserror::Error;

use crate::raw::{self, IngestError, RawFace};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("failed to run extractor `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("extractor exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
    #[error("extractor output is not JSON: {0}")]
    Output(#[from] serde_json::Error),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Black-box face embedding extractor.
///
/// Returns every face found in the image; an empty list means the image
/// decoded but no face was detected.
pub trait EmbeddingOracle {
    fn extract(&mut self, image: &Path) -> Result<Vec<RawFace>, OracleError>;
}

/// Runs an external extractor once per image, with the image path appended
/// to the configured command line. The extractor prints a single JSON object
/// on stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    /// `None` if the command line is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl EmbeddingOracle for CommandOracle {
    fn extract(&mut self, image: &Path) -> Result<Vec<RawFace>, OracleError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()
            .map_err(|source| OracleError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        debug!(
            "{} on {}: {}",
            self.program,
            image.display(),
            output.status
        );
        if !output.stderr.is_empty() {
            debug!("extractor stderr: {}", String::from_utf8_lossy(&output.stderr).trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        // extractors report "no face" as a JSON error object with a non-zero
        // exit, so stdout is checked before the status
        match serde_json::from_str::<serde_json::Value>(stdout.trim()) {
            Ok(value) => Ok(raw::faces_from_extractor_output(&value)?),
            Err(_) if !output.status.success() => Err(OracleError::Exit {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Err(e) => Err(OracleError::Output(e)),
        }
    }
}
