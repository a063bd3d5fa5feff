//! Pipeline declarations and dependency resolution

use crate::core::step::Step;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while turning a pipeline into an execution order
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown step '{key}' referenced by {referenced_by}")]
    UnknownStep { key: String, referenced_by: String },

    #[error("unknown pipeline '{name}'")]
    UnknownPipeline { name: String },

    #[error("circular dependency: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },
}

/// A named, ordered list of step keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub name: String,
    pub keys: Vec<String>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            keys,
        }
    }

    /// Look a pipeline up among the declared ones
    pub fn from_declared(
        name: &str,
        declared: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ResolveError> {
        declared
            .get(name)
            .map(|keys| Self::new(name, keys.clone()))
            .ok_or_else(|| ResolveError::UnknownPipeline {
                name: name.to_string(),
            })
    }
}

/// Turns a pipeline into a dependency-complete execution order
///
/// Each declared step is appended in order, then every step it depends on is
/// inserted immediately before it, recursively. Insertion never deduplicates:
/// a step reachable through two paths is scheduled twice.
pub struct DependencyResolver<'a> {
    steps: &'a BTreeMap<String, Step>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(steps: &'a BTreeMap<String, Step>) -> Self {
        Self { steps }
    }

    /// Resolve the execution order for `pipeline`
    pub fn resolve(&self, pipeline: &Pipeline) -> Result<Vec<Step>, ResolveError> {
        let mut order = Vec::new();
        let referenced_by = format!("pipeline '{}'", pipeline.name);

        for key in &pipeline.keys {
            let step = self.lookup(key, &referenced_by)?;
            order.push(step);

            let position = order.len() - 1;
            let mut chain = vec![key.clone()];
            self.insert_dependencies(&mut order, position, &mut chain)?;
        }

        Ok(order)
    }

    /// Insert the dependencies of `order[at]` right before it; returns how many
    /// steps were inserted in total
    fn insert_dependencies(
        &self,
        order: &mut Vec<Step>,
        mut at: usize,
        chain: &mut Vec<String>,
    ) -> Result<usize, ResolveError> {
        let dependent = order[at].key.clone();
        let dependencies = order[at].depends_on.clone();
        let mut inserted = 0;

        for dependency in dependencies {
            if chain.contains(&dependency) {
                let mut cycle = chain.clone();
                cycle.push(dependency);
                return Err(ResolveError::CircularDependency { chain: cycle });
            }

            let step = self.lookup(&dependency, &format!("step '{}'", dependent))?;
            order.insert(at, step);

            chain.push(dependency);
            let nested = self.insert_dependencies(order, at, chain)?;
            chain.pop();

            // The dependent moved behind the dependency and its own prerequisites
            at += 1 + nested;
            inserted += 1 + nested;
        }

        Ok(inserted)
    }

    fn lookup(&self, key: &str, referenced_by: &str) -> Result<Step, ResolveError> {
        self.steps
            .get(key)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownStep {
                key: key.to_string(),
                referenced_by: referenced_by.to_string(),
            })
    }
}
