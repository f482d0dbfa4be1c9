mod builder;
mod cache;
mod coerce;
mod error;
mod evaluator;
mod input;
mod mapper;
mod path;
mod resolver;
mod schema;
mod table;
mod validator;
mod value;
mod variables;
pub mod datefmt;
pub mod el_eval;
pub mod el_model;
pub mod el_parser;
pub mod record_path;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use builder::{BuildOutcome, RecordBuilder, default_record};
pub use cache::{CompiledSource, ExpressionCache, compile_source};
pub use coerce::{CoerceError, coerce_scalar};
pub use error::{
    ConfigError, ErrorCode, MapError, MapErrorKind, MapWarning, ValidationResult,
};
pub use evaluator::{GlobalVarCache, VarValues, VariableEvaluator};
pub use input::{CsvOptions, read_csv_records, read_json_records};
pub use mapper::{
    BatchOutput, MappedRecord, RECORD_COUNT_ATTRIBUTE, RecordMapper, RecordOutcome, TableOutput,
};
pub use path::{MAX_ARRAY_INDEX, PathError, PathExpression, PathSegment};
pub use resolver::{ResolvedEnvironment, resolve, resolve_compiled};
pub use schema::{DataType, RecordSchema, SchemaError, SchemaField};
pub use table::{
    DEFAULT_INPUT_NAME, FieldMapping, InputTableSpec, MapperConfig, OutputTableSpec,
    evaluate_filter, parse_mapper_config, should_emit,
};
pub use validator::validate_config;
pub use value::{Fields, Value, ValueKind};
pub use variables::{VAR_MARKER, VarScope, Variable, VariableAnalysis, VariableTable};
