//! Grader registry.
//!
//! Built once at start-up through [`GraderRegistryBuilder`], where every
//! grader is registered under an explicit canonical name, then shared
//! read-only (`Arc<GraderRegistry>`) with the trial runner. A lookup miss
//! means the criterion names an unknown grader, which callers treat as a
//! hard failure.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{PasskError, Result};
use crate::grader::{
    CodeGrader, FileContainsGrader, FileExistsGrader, Grader, ModelGrader, NoTodoMarkersGrader,
    RubricGrader, TaskAlignmentGrader, TestsExistGrader,
};
use crate::llm::{CompletionClient, CompletionOptions};

/// Immutable, name-indexed catalog of graders.
#[derive(Debug, Clone, Default)]
pub struct GraderRegistry {
    graders: HashMap<String, Grader>,
}

impl GraderRegistry {
    pub fn builder() -> GraderRegistryBuilder {
        GraderRegistryBuilder::default()
    }

    /// Registry holding every built-in grader.
    ///
    /// Model graders are only registered when a completion client is given.
    pub fn with_builtins(
        client: Option<Arc<dyn CompletionClient>>,
        options: CompletionOptions,
    ) -> Result<Self> {
        GraderRegistryBuilder::with_builtins(client, options).build()
    }

    pub fn get(&self, name: &str) -> Option<&Grader> {
        self.graders.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graders.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.graders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.graders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graders.is_empty()
    }
}

/// Collects graders under explicit names; duplicates surface at `build()`.
#[derive(Debug, Default)]
pub struct GraderRegistryBuilder {
    graders: HashMap<String, Grader>,
    duplicates: Vec<String>,
}

impl GraderRegistryBuilder {
    /// Builder pre-loaded with the built-in graders.
    pub fn with_builtins(
        client: Option<Arc<dyn CompletionClient>>,
        options: CompletionOptions,
    ) -> Self {
        let builder = Self::default()
            .code("file-exists", FileExistsGrader)
            .code("tests-exist", TestsExistGrader)
            .code("file-contains", FileContainsGrader)
            .code("no-todo-markers", NoTodoMarkersGrader);

        match client {
            Some(client) => builder
                .model(
                    "task-alignment",
                    TaskAlignmentGrader::new(client.clone(), options.clone()),
                )
                .model("rubric", RubricGrader::new(client, options)),
            None => builder,
        }
    }

    pub fn code(self, name: impl Into<String>, grader: impl CodeGrader + 'static) -> Self {
        self.register(name, Grader::code(grader))
    }

    pub fn model(self, name: impl Into<String>, grader: impl ModelGrader + 'static) -> Self {
        self.register(name, Grader::model(grader))
    }

    pub fn register(mut self, name: impl Into<String>, grader: Grader) -> Self {
        let name = name.into();
        if self.graders.contains_key(&name) {
            self.duplicates.push(name);
        } else {
            self.graders.insert(name, grader);
        }
        self
    }

    pub fn build(self) -> Result<GraderRegistry> {
        if let Some(name) = self.duplicates.into_iter().next() {
            return Err(PasskError::DuplicateGrader(name));
        }
        Ok(GraderRegistry {
            graders: self.graders,
        })
    }
}
