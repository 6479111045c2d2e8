//! Text encoders that turn course titles and queries into dense vectors.

pub mod openai;

use std::fmt;

/// Failure modes shared by every encoder backend.
#[derive(Debug)]
pub enum EncodeError {
    /// The input was empty or whitespace-only.
    EmptyInput,
    /// The backend refused the input outright.
    Rejected {
        /// HTTP status reported by the backend.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The backend answered with something unusable.
    Malformed(String),
    /// Transport failures, server errors, or retries exhausted.
    Backend(anyhow::Error),
}

impl EncodeError {
    /// True when the failure is attributable to the submitted text.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::EmptyInput | Self::Rejected { .. })
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "cannot encode empty text"),
            Self::Rejected { status, body } => {
                write!(f, "encoder rejected input ({}): {}", status, body)
            }
            Self::Malformed(reason) => write!(f, "malformed encoder response: {}", reason),
            Self::Backend(err) => write!(f, "encoder backend failed: {:#}", err),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Maps text to fixed-length vectors.
///
/// Implementations are blocking; async callers run them on the blocking pool.
pub trait Encoder: Send + Sync {
    /// Encodes a batch, returning one vector per input in input order.
    fn encode_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EncodeError>;

    /// Maximum inputs accepted by a single [`Encoder::encode_batch`] call.
    fn max_batch(&self) -> usize {
        1
    }

    /// Encodes one piece of text.
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        if text.trim().is_empty() {
            return Err(EncodeError::EmptyInput);
        }
        let mut vectors = self.encode_batch(&[text])?;
        match (vectors.pop(), vectors.is_empty()) {
            (Some(vector), true) => Ok(vector),
            _ => Err(EncodeError::Malformed(
                "expected exactly one embedding".to_string(),
            )),
        }
    }
}
