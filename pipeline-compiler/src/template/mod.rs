// Template module
// Compile-time expansion of directives, parameters and template references

pub mod error;
pub mod expander;
pub mod loader;
pub mod parameters;

pub use error::{TemplateError, TemplateErrorKind};
pub use expander::{Expander, MAX_TEMPLATE_DEPTH};
pub use loader::{FileSystemLoader, LoadedTemplate, MemoryLoader, TemplateLoader};
pub use parameters::{bind, parse_declarations, Bindings, Parameter, ParameterType};
