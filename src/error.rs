/// Error returned from the fitting core
///
/// Configuration errors are reported as soon as they are detected. Numerical degeneracies which
/// can be recovered from are not errors, they are reported as
/// [Diagnostic](crate::Diagnostic) values of the fit results.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum FitError {
    #[error("no parameters are selected for fitting")]
    NoVariableParameters,

    #[error("correlation data is missing, only the model curve is available")]
    NoCorrelationData,

    #[error("invalid correlation data: {0}")]
    InvalidCorrelation(&'static str),

    #[error(
        "weights {key:?} have length {actual}, expected {expected} (fit interval) or {full} (full data)"
    )]
    WeightLength {
        key: String,
        expected: usize,
        full: usize,
        actual: usize,
    },

    #[error("unsupported fit weight type {0:?}")]
    UnknownWeightType(String),

    #[error("{0:?} names a built-in weight type and cannot key external weights")]
    ReservedWeightKey(String),

    #[error("unsupported fit algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("constraint {constraint} is invalid: {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("spline weights with {knots} knots could not be computed: {reason}")]
    SplineNotConverged { knots: usize, reason: String },

    #[error("{what} has {actual} entries, the model has {expected} parameters")]
    ParameterCount {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("background channel {channel} is not valid for correlation type {corr_type:?}")]
    InvalidChannel { channel: usize, corr_type: String },

    #[error("{actual} {what} given, correlation type {corr_type:?} allows at most {maximum}")]
    TooManyTraces {
        what: &'static str,
        actual: usize,
        maximum: usize,
        corr_type: String,
    },

    #[error("invalid trace: {0}")]
    InvalidTrace(&'static str),

    #[error("{points} data points are too few to fit {variables} parameters")]
    TooFewDataPoints { points: usize, variables: usize },

    #[error("normalization parameter {index} exceeds {available} available values")]
    NormalizeParameter { index: usize, available: usize },

    #[error("model {0} is not registered")]
    UnknownModel(u32),

    #[error("model {0} is already registered")]
    DuplicateModel(u32),

    #[error("invalid model definition: {0}")]
    InvalidModel(String),

    #[error("fit was cancelled")]
    Cancelled,
}
