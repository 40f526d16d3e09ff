use oxrdf::vocab::xsd;
use oxrdf::NamedNode;

/// The RDF node kind a resource template parameter produces.
///
/// Carried from template declarations into virtualized sub-queries so that
/// tabular backend columns can be retyped as RDF terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RDFType {
    /// A literal with the given XSD (or user-defined) datatype.
    Literal(NamedNode),
    /// A named node.
    Iri,
    /// A blank node.
    Blank,
}

impl RDFType {
    pub fn string() -> RDFType {
        RDFType::Literal(xsd::STRING.into_owned())
    }

    pub fn date_time() -> RDFType {
        RDFType::Literal(xsd::DATE_TIME.into_owned())
    }

    pub fn double() -> RDFType {
        RDFType::Literal(xsd::DOUBLE.into_owned())
    }

    pub fn integer() -> RDFType {
        RDFType::Literal(xsd::INTEGER.into_owned())
    }

    /// The datatype IRI recorded in result metadata for this kind.
    pub fn datatype(&self) -> Option<&NamedNode> {
        match self {
            RDFType::Literal(datatype) => Some(datatype),
            RDFType::Iri | RDFType::Blank => None,
        }
    }
}
