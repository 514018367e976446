// Expression Engine Module
// Compile-time ${{ }} expressions. $[ ] and $( ) are recognised only so they
// can be passed through untouched.

pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod segments;
pub mod value;

pub use error::{EvalError, EvalErrorKind};
pub use evaluator::{
    evaluate, substitute, Evaluator, ExpressionContext, ExpressionEngine, UpstreamStatus,
};
pub use functions::{values_equal, BuiltinFunctions};
pub use lexer::{Lexer, Token};
pub use parser::{Accessor, Expr, ExprParser, Reference};
pub use segments::{extract_segments, has_compile_time, Segment};
pub use value::Value;

