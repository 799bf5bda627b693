//! Script templates and their placeholder bindings.

pub mod binding;
pub mod renderer;

pub use binding::{BindingValue, Bindings};
pub use renderer::TemplateRegistry;
