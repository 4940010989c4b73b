use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub type EsrResult<T> = Result<T, EsrError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EsrErrorKind {
    InsufficientData,
    Range,
    Parameter,
    Domain,
    MissingMetadata,
    FitConvergence,
    Calibration,
}

impl EsrErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientData => "InsufficientDataError",
            Self::Range => "RangeError",
            Self::Parameter => "ParameterError",
            Self::Domain => "DomainError",
            Self::MissingMetadata => "MissingMetadataError",
            Self::FitConvergence => "FitConvergenceError",
            Self::Calibration => "CalibrationError",
        }
    }

    /// Process exit code used by front-ends. Input problems share 2, numeric
    /// failures share 4, mirroring the validation/computation split.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InsufficientData
            | Self::Range
            | Self::Parameter
            | Self::Domain
            | Self::MissingMetadata => 2,
            Self::FitConvergence | Self::Calibration => 4,
        }
    }
}

impl Display for EsrErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitFailureReason {
    NonFiniteResidual,
    MaxIterations,
    SingularCovariance,
}

impl Display for FitFailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NonFiniteResidual => "residual became non-finite",
            Self::MaxIterations => "maximum iterations reached",
            Self::SingularCovariance => "normal matrix is singular at the solution",
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EsrError {
    #[error("[{operation}] {message}")]
    InsufficientData {
        operation: &'static str,
        message: String,
    },
    #[error("[{operation}] {message}")]
    Range {
        operation: &'static str,
        message: String,
    },
    #[error("[{operation}] {message}")]
    Parameter {
        operation: &'static str,
        message: String,
    },
    #[error("[{operation}] {message}")]
    Domain {
        operation: &'static str,
        message: String,
    },
    #[error("[{operation}] required metadata '{key}' is missing")]
    MissingMetadata {
        operation: &'static str,
        key: &'static str,
    },
    #[error("[{operation}] {reason} after {iterations} iterations (last parameters: {last_parameters:?})")]
    FitConvergence {
        operation: &'static str,
        reason: FitFailureReason,
        iterations: usize,
        last_parameters: Vec<f64>,
    },
    #[error("[{operation}] {message}")]
    Calibration {
        operation: &'static str,
        message: String,
    },
}

impl EsrError {
    pub fn insufficient_data(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InsufficientData {
            operation,
            message: message.into(),
        }
    }

    pub fn range(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Range {
            operation,
            message: message.into(),
        }
    }

    pub fn parameter(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Parameter {
            operation,
            message: message.into(),
        }
    }

    pub fn domain(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Domain {
            operation,
            message: message.into(),
        }
    }

    pub fn missing_metadata(operation: &'static str, key: &'static str) -> Self {
        Self::MissingMetadata { operation, key }
    }

    pub fn calibration(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Calibration {
            operation,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> EsrErrorKind {
        match self {
            Self::InsufficientData { .. } => EsrErrorKind::InsufficientData,
            Self::Range { .. } => EsrErrorKind::Range,
            Self::Parameter { .. } => EsrErrorKind::Parameter,
            Self::Domain { .. } => EsrErrorKind::Domain,
            Self::MissingMetadata { .. } => EsrErrorKind::MissingMetadata,
            Self::FitConvergence { .. } => EsrErrorKind::FitConvergence,
            Self::Calibration { .. } => EsrErrorKind::Calibration,
        }
    }

    pub const fn operation(&self) -> &'static str {
        match self {
            Self::InsufficientData { operation, .. }
            | Self::Range { operation, .. }
            | Self::Parameter { operation, .. }
            | Self::Domain { operation, .. }
            | Self::MissingMetadata { operation, .. }
            | Self::FitConvergence { operation, .. }
            | Self::Calibration { operation, .. } => operation,
        }
    }

    pub const fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: {} {}", self.kind(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::{EsrError, EsrErrorKind, FitFailureReason};

    #[test]
    fn kind_exit_mapping_is_stable() {
        let cases = [
            (EsrErrorKind::InsufficientData, 2, "InsufficientDataError"),
            (EsrErrorKind::Range, 2, "RangeError"),
            (EsrErrorKind::Parameter, 2, "ParameterError"),
            (EsrErrorKind::Domain, 2, "DomainError"),
            (EsrErrorKind::MissingMetadata, 2, "MissingMetadataError"),
            (EsrErrorKind::FitConvergence, 4, "FitConvergenceError"),
            (EsrErrorKind::Calibration, 4, "CalibrationError"),
        ];

        for (kind, exit_code, name) in cases {
            assert_eq!(kind.exit_code(), exit_code);
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn diagnostic_line_names_kind_and_operation() {
        let error = EsrError::parameter("smooth", "window must be odd, got 4");
        assert_eq!(error.kind(), EsrErrorKind::Parameter);
        assert_eq!(error.operation(), "smooth");
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: ParameterError [smooth] window must be odd, got 4"
        );
    }

    #[test]
    fn fit_convergence_error_keeps_last_iterate() {
        let error = EsrError::FitConvergence {
            operation: "fit_spectrum",
            reason: FitFailureReason::MaxIterations,
            iterations: 200,
            last_parameters: vec![0.34, 1.0e-3],
        };
        assert_eq!(error.exit_code(), 4);
        let rendered = error.to_string();
        assert!(rendered.contains("maximum iterations reached after 200 iterations"));
        assert!(rendered.contains("0.34"));
    }

    #[test]
    fn missing_metadata_names_the_key() {
        let error = EsrError::missing_metadata("g_factor", "frequency_hz");
        assert_eq!(
            error.to_string(),
            "[g_factor] required metadata 'frequency_hz' is missing"
        );
    }
}
