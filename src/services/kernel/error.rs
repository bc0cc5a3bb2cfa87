//! Numeric Kernel error taxonomy.

/// Errors raised by decimal reduction and expression evaluation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    #[error("expression syntax error: {0}")]
    ExprSyntaxError(String),

    #[error("unknown name in expression: {0}")]
    ExprNameError(String),

    #[error("expression math error: {0}")]
    ExprMathError(String),
}
