//! Execution catalog: which languages, images, and task command lines
//! this runner is willing to execute. Requests select a
//! language/processor/task triple; nothing outside the catalog runs.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("language not found: '{0}'")]
    UnknownLanguage(String),

    #[error("processor not found: '{0}'")]
    UnknownProcessor(String),

    #[error("task not found: '{0}'")]
    UnknownTask(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub languages: Vec<Language>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    pub id: String,
    pub show_name: String,
    pub processors: Vec<Processor>,
}

/// One concrete toolchain of a language: the image it runs in and the
/// tasks it supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Processor {
    pub id: String,
    pub show_name: String,
    pub image: String,
    /// Filename clients should stage when they have no better name.
    pub default_filename: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub show_name: String,
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Phase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Primary task of the processor (build-and-run).
    Action,
    /// Auxiliary tooling (formatters, linters).
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub cmd: Vec<String>,
}

impl Phase {
    /// Join argv into the `/bin/sh -c` command line.
    // TODO: shell-quote arguments containing whitespace
    pub fn shell_command(&self) -> String {
        self.cmd.join(" ")
    }
}

fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

impl Catalog {
    /// Built-in catalog, used when no catalog file is configured.
    pub fn builtin() -> Self {
        Self {
            languages: vec![Language {
                id: "test-shell".into(),
                show_name: "Test Shell".into(),
                processors: vec![Processor {
                    id: "alpine-sh-latest".into(),
                    show_name: "sh (alpine:latest)".into(),
                    image: "alpine:latest".into(),
                    default_filename: "main.sh".into(),
                    tasks: vec![Task {
                        id: "run".into(),
                        show_name: "Run".into(),
                        kind: TaskKind::Action,
                        compile: None,
                        run: Some(Phase {
                            cmd: vec!["sh".into(), "main.sh".into()],
                        }),
                    }],
                }],
            }],
        }
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw).map_err(invalid_data)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let raw = serde_json::to_vec_pretty(self).map_err(invalid_data)?;
        std::fs::write(path, raw)
    }

    /// Resolve a language/processor/task triple.
    pub fn lookup(
        &self,
        language_id: &str,
        processor_id: &str,
        task_id: &str,
    ) -> Result<(&Language, &Processor, &Task), LookupError> {
        let language = self
            .languages
            .iter()
            .find(|l| l.id == language_id)
            .ok_or_else(|| LookupError::UnknownLanguage(language_id.into()))?;
        let processor = language
            .processors
            .iter()
            .find(|p| p.id == processor_id)
            .ok_or_else(|| LookupError::UnknownProcessor(processor_id.into()))?;
        let task = processor
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| LookupError::UnknownTask(task_id.into()))?;
        Ok((language, processor, task))
    }
}
