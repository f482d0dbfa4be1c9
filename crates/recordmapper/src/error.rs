#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    MissingName,
    DuplicateOutput,
    InvalidSchema,

    // field mappings
    InvalidPath,
    UnknownTarget,
    InvalidTarget,
    InvalidExpression,
    InvalidFilter,

    // variable tables
    InvalidVariable,
    DuplicateVariable,
    GlobalRecordPath,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingName => "MissingName",
            ErrorCode::DuplicateOutput => "DuplicateOutput",
            ErrorCode::InvalidSchema => "InvalidSchema",
            ErrorCode::InvalidPath => "InvalidPath",
            ErrorCode::UnknownTarget => "UnknownTarget",
            ErrorCode::InvalidTarget => "InvalidTarget",
            ErrorCode::InvalidExpression => "InvalidExpression",
            ErrorCode::InvalidFilter => "InvalidFilter",
            ErrorCode::InvalidVariable => "InvalidVariable",
            ErrorCode::DuplicateVariable => "DuplicateVariable",
            ErrorCode::GlobalRecordPath => "GlobalRecordPath",
        }
    }
}

/// A problem found while validating a mapper configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub code: ErrorCode,
    pub message: String,
    pub path: Option<String>,
}

impl ConfigError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {} (path: {})", self.code.as_str(), self.message, path),
            None => write!(f, "{}: {}", self.code.as_str(), self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

pub type ValidationResult = Result<(), Vec<ConfigError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapErrorKind {
    /// Source expression was blank; the mapping is skipped.
    EmptyExpression,
    TypeMismatch,
    FilterFailure,
    ExprError,
    InvalidPath,
    InvalidInput,
}

impl MapErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapErrorKind::EmptyExpression => "EmptyExpression",
            MapErrorKind::TypeMismatch => "TypeMismatch",
            MapErrorKind::FilterFailure => "FilterFailure",
            MapErrorKind::ExprError => "ExprError",
            MapErrorKind::InvalidPath => "InvalidPath",
            MapErrorKind::InvalidInput => "InvalidInput",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapWarning {
    pub kind: MapErrorKind,
    pub message: String,
    pub path: Option<String>,
}

impl MapWarning {
    pub fn new(kind: MapErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for MapWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {} (path: {})", self.kind.as_str(), self.message, path),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapError {
    pub kind: MapErrorKind,
    pub message: String,
    pub path: Option<String>,
}

impl MapError {
    pub fn new(kind: MapErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{} (path: {})", self.message, path)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for MapError {}

impl From<MapError> for MapWarning {
    fn from(err: MapError) -> Self {
        let mut warning = MapWarning::new(err.kind, err.message);
        if let Some(path) = err.path {
            warning = warning.with_path(path);
        }
        warning
    }
}

impl From<csv::Error> for MapError {
    fn from(err: csv::Error) -> Self {
        MapError::new(MapErrorKind::InvalidInput, format!("csv error: {}", err))
    }
}

impl From<serde_json::Error> for MapError {
    fn from(err: serde_json::Error) -> Self {
        MapError::new(MapErrorKind::InvalidInput, format!("json error: {}", err))
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_warning_keeps_path_from_error() {
        let err = MapError::new(MapErrorKind::TypeMismatch, "cannot coerce 'abc' to int")
            .with_path("outputs[people].fields[/age]");
        let warning: MapWarning = err.into();
        assert_eq!(warning.kind, MapErrorKind::TypeMismatch);
        assert_eq!(warning.path.as_deref(), Some("outputs[people].fields[/age]"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::new(ErrorCode::DuplicateVariable, "variable 'x' declared twice")
            .with_path("global_vars[1]");
        assert_eq!(
            err.to_string(),
            "DuplicateVariable: variable 'x' declared twice (path: global_vars[1])"
        );
    }
}
