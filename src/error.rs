//! Error types.
//!
//! Domain code returns one of the typed errors below; the CLI boundary converts
//! everything into [`AppError`], which carries the process exit code:
//!
//! - `2`: configuration or input error
//! - `3`: a referenced histogram or process is missing
//! - `4`: computation error

use thiserror::Error;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Errors raised while evaluating correction tables or weight sources.
#[derive(Error, Debug)]
pub enum WeightError {
    /// No correction registered for this `(year, name)`.
    #[error("missing calibration '{name}' for year '{year}'")]
    MissingCalibration { year: String, name: String },

    /// The table has no content for the requested variation tag.
    #[error("correction '{name}' has no variation '{tag}'")]
    UnknownVariation { name: String, tag: String },

    /// Feature vectors do not match the table inputs.
    #[error("correction '{name}': {detail}")]
    FeatureMismatch { name: String, detail: String },

    /// The source only implements the nominal shape pass.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A weight source produced an array that violates the output contract.
    #[error("weight '{name}' produced invalid output: {detail}")]
    InvalidOutput { name: String, detail: String },

    /// Unknown weight name in the configuration.
    #[error("unknown weight '{0}'")]
    UnknownWeight(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Two histograms with different edges were combined.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("binning mismatch: {0}")]
pub struct BinningError(pub String);

/// Errors raised while filling histogram templates from event batches.
#[derive(Error, Debug)]
pub enum FillError {
    #[error("invalid batch for sample '{sample}': {detail}")]
    InvalidBatch { sample: String, detail: String },

    #[error("batch of sample '{sample}' has no column '{name}'")]
    MissingColumn { sample: String, name: String },

    #[error("batch of sample '{sample}' has no mask for category '{name}'")]
    MissingCategory { sample: String, name: String },

    #[error("no binning defined for variable '{0}'")]
    UnknownVariable(String),

    #[error(transparent)]
    Weight(#[from] WeightError),

    #[error(transparent)]
    Binning(#[from] BinningError),
}

/// Structural problems found while expanding systematic declarations.
#[derive(Error, Debug)]
pub enum SystematicsError {
    /// Two entries share a datacard name with partially overlapping scopes.
    #[error("systematic '{datacard_name}' has partially overlapping scopes")]
    ScopeOverlap { datacard_name: String },

    /// Two entries share a datacard name but not the same kind.
    #[error("systematic '{datacard_name}' is declared with conflicting kinds")]
    KindConflict { datacard_name: String },

    /// A declaration refers to a process that is not defined.
    #[error("systematic '{source_name}' refers to unknown process '{process}'")]
    UnknownProcess { source_name: String, process: String },

    /// A log-normal value must be finite and positive.
    #[error("systematic '{source_name}' has invalid value {value}")]
    InvalidValue { source_name: String, value: f64 },
}

/// Errors raised while assembling or writing datacards.
#[derive(Error, Debug)]
pub enum DatacardError {
    #[error("missing histogram for sample '{sample}', year '{year}', category '{category}', variation '{variation}'")]
    MissingHistogram {
        sample: String,
        year: String,
        category: String,
        variation: String,
    },

    #[error("process '{process}' has no templates in category '{category}'")]
    MissingProcess { process: String, category: String },

    #[error(transparent)]
    Binning(#[from] BinningError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<WeightError> for AppError {
    fn from(err: WeightError) -> Self {
        let code = match err {
            WeightError::MissingCalibration { .. }
            | WeightError::UnknownWeight(_)
            | WeightError::Io(_)
            | WeightError::Json(_) => 2,
            _ => 4,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<FillError> for AppError {
    fn from(err: FillError) -> Self {
        match err {
            FillError::Weight(inner) => inner.into(),
            FillError::Binning(_) => AppError::new(4, err.to_string()),
            _ => AppError::new(2, err.to_string()),
        }
    }
}

impl From<SystematicsError> for AppError {
    fn from(err: SystematicsError) -> Self {
        AppError::new(2, err.to_string())
    }
}

impl From<DatacardError> for AppError {
    fn from(err: DatacardError) -> Self {
        let code = match err {
            DatacardError::MissingHistogram { .. } | DatacardError::MissingProcess { .. } => 3,
            DatacardError::Binning(_) => 4,
            DatacardError::Io(_) | DatacardError::Json(_) => 2,
        };
        AppError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_histogram_maps_to_exit_code_3() {
        let err: AppError = DatacardError::MissingHistogram {
            sample: "TTV".to_string(),
            year: "2018".to_string(),
            category: "SR".to_string(),
            variation: "pileupUp".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("pileupUp"));
    }

    #[test]
    fn fill_errors_keep_the_weight_exit_code() {
        let err: AppError = FillError::Weight(WeightError::MissingCalibration {
            year: "2018".to_string(),
            name: "pu".to_string(),
        })
        .into();
        assert_eq!(err.exit_code(), 2);
        let err: AppError = FillError::Binning(BinningError("SR".to_string())).into();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn not_implemented_maps_to_computation_code() {
        let err: AppError = WeightError::NotImplemented("JES pass".to_string()).into();
        assert_eq!(err.exit_code(), 4);
    }
}
