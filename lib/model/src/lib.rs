#![doc = include_str!("../README.md")]

mod error;
mod native;
mod rdf_type;
mod solutions;
pub mod vocab;

pub use error::TermError;
pub use native::{format_date_time, parse_date_time, NativeValue};
pub use rdf_type::RDFType;
pub use solutions::SolutionTable;

// Re-export the oxrdf data model so downstream crates share one term type.
pub use oxrdf::vocab::xsd;
pub use oxrdf::{
    BlankNode, Literal, LiteralRef, NamedNode, NamedNodeRef, Term, TermRef, Variable,
};
