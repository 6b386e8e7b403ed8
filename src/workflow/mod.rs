pub mod graph;
pub mod instantiator;
pub mod template;
pub mod validator;

pub use instantiator::{Instantiator, TemplateSource};
pub use template::{Edge, Node, NodeMetadata, TemplateGraph, TemplateRecord};
pub use validator::{TaskTypeLookup, TemplateValidator, ValidatedGraph};
