use crate::{ResourceSignature, SchemaError, Template};
use oxrdf::NamedNode;
use std::collections::{HashMap, HashSet};

/// The immutable set of resource templates an engine is configured with.
///
/// Constructed once at engine init; validation failures refuse the whole
/// registry so the engine never starts with an inconsistent schema.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
    signatures: Vec<ResourceSignature>,
    virtual_predicates: HashSet<NamedNode>,
}

impl TemplateRegistry {
    pub fn new(templates: HashMap<String, Template>) -> Result<TemplateRegistry, SchemaError> {
        for template in templates.values() {
            template.validate()?;
        }
        let mut signatures = Vec::with_capacity(templates.len());
        for (index, (name, template)) in templates.iter().enumerate() {
            signatures.push(ResourceSignature::new(
                name.clone(),
                template,
                &index.to_string(),
            )?);
        }
        let virtual_predicates = signatures
            .iter()
            .flat_map(|s| s.predicates().cloned())
            .collect();
        Ok(TemplateRegistry {
            templates,
            signatures,
            virtual_predicates,
        })
    }

    pub fn get(&self, name: &str) -> Result<&Template, SchemaError> {
        self.templates
            .get(name)
            .ok_or_else(|| SchemaError::UnknownResource {
                name: name.to_owned(),
            })
    }

    pub fn signatures(&self) -> &[ResourceSignature] {
        &self.signatures
    }

    /// Whether a constant predicate can only be produced by a template body.
    pub fn is_virtual_predicate(&self, predicate: &NamedNode) -> bool {
        self.virtual_predicates.contains(predicate)
    }
}
