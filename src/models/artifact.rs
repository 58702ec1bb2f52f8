//! Generation Request & Project Artifact Models
//!
//! Wire shapes of a generation request and of the project it produces.
//! File paths are always absolute (`/App.js`) and never carry a `src/`
//! prefix.

use std::collections::BTreeMap;

use codeforge_llm::{Message, MessageRole};
use serde::{Deserialize, Serialize};

/// Path of the entry component every plan contains
pub const ENTRY_FILE: &str = "/App.js";
/// Path of the global stylesheet every plan contains
pub const STYLESHEET_FILE: &str = "/index.css";
/// Title used when the model does not supply one
pub const DEFAULT_PROJECT_TITLE: &str = "Generated Project";
/// Marker written into placeholder files
pub const PLACEHOLDER_MARKER: &str = "GENERATION FAILED";

/// Optional service integrations the generated project should wire in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default)]
    pub include_supabase: bool,
    #[serde(default)]
    pub deploy_to_vercel: bool,
}

/// One request to generate (or update) a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Conversation transcript, oldest first
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Files the caller already has
    #[serde(default)]
    pub current_file_paths: Vec<String>,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Shorthand for a single user message
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    pub fn with_existing_files(mut self, paths: Vec<String>) -> Self {
        self.current_file_paths = paths;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Content of the most recent user message, or empty
    pub fn latest_user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Existing paths normalized and de-duplicated
    pub fn existing_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for path in self.current_file_paths.iter().filter_map(|p| normalize_path(p)) {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }
}

/// One entry of the file plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePlanEntry {
    pub path: String,
    pub description: String,
}

impl FilePlanEntry {
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
        }
    }
}

/// Code produced for one plan entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: String,
    pub code: String,
    /// Set when generation failed and `code` is a stand-in
    pub placeholder: bool,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            placeholder: false,
        }
    }

    /// Stand-in for a file whose generation exhausted its retries
    pub fn placeholder(path: impl Into<String>, reason: &str) -> Self {
        let path = path.into();
        let reason = reason.replace("*/", "* /");
        let code = format!(
            "/*\n * {marker}: {path}\n * Reason: {reason}\n * Regenerate the project to try again.\n */\n\nexport default function Placeholder() {{\n  return null;\n}}\n",
            marker = PLACEHOLDER_MARKER,
            path = path,
            reason = reason,
        );
        Self {
            path,
            code,
            placeholder: true,
        }
    }
}

/// Content of one artifact file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    #[serde(default)]
    pub code: String,
}

/// The generated project handed to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectArtifact {
    #[serde(default = "default_title")]
    pub project_title: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub files: BTreeMap<String, FileContent>,
}

fn default_title() -> String {
    DEFAULT_PROJECT_TITLE.to_string()
}

impl ProjectArtifact {
    pub fn new(project_title: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            project_title: project_title.into(),
            explanation: explanation.into(),
            files: BTreeMap::new(),
        }
    }

    /// Assemble from generated files; later duplicates overwrite earlier ones.
    pub fn from_files(
        project_title: impl Into<String>,
        explanation: impl Into<String>,
        files: &[GeneratedFile],
    ) -> Self {
        let mut artifact = Self::new(project_title, explanation);
        for file in files {
            artifact.insert(&file.path, file.code.clone());
        }
        artifact
    }

    /// Insert a file under its normalized path. Unusable paths are ignored.
    pub fn insert(&mut self, path: &str, code: String) {
        if let Some(path) = normalize_path(path) {
            self.files.insert(path, FileContent { code });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    /// Build from a loosely shaped JSON value.
    ///
    /// Accepts `{projectTitle?, explanation?, files: {path: {code} | "code"}}`,
    /// or a bare top-level file map whose keys start with `/`. Returns `None`
    /// when no file survives.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;

        if let Some(files) = object.get("files").and_then(|f| f.as_object()) {
            let title = object
                .get("projectTitle")
                .and_then(|t| t.as_str())
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(DEFAULT_PROJECT_TITLE);
            let explanation = object
                .get("explanation")
                .and_then(|e| e.as_str())
                .unwrap_or("");
            let mut artifact = Self::new(title, explanation);
            artifact.extend_from_map(files);
            return (!artifact.is_empty()).then_some(artifact);
        }

        let looks_like_file_map = object.keys().any(|k| k.starts_with('/'))
            && object.values().any(|v| v.get("code").is_some());
        if looks_like_file_map {
            let mut artifact = Self::new(DEFAULT_PROJECT_TITLE, "");
            artifact.extend_from_map(object);
            return (!artifact.is_empty()).then_some(artifact);
        }
        None
    }

    fn extend_from_map(&mut self, files: &serde_json::Map<String, serde_json::Value>) {
        for (path, content) in files {
            let code = match content {
                serde_json::Value::String(code) => Some(code.clone()),
                serde_json::Value::Object(obj) => match obj.get("code") {
                    Some(serde_json::Value::String(code)) => Some(code.clone()),
                    Some(_) | None => serde_json::to_string_pretty(content).ok(),
                },
                _ => None,
            };
            if let Some(code) = code {
                self.insert(path, code);
            }
        }
    }
}

/// Normalize a project path: forward slashes, leading `/`, no `./` or `src/`
/// prefix. Returns `None` for paths with nothing left.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut rest = path.trim().replace('\\', "/");
    loop {
        let trimmed = rest
            .trim_start_matches('/')
            .trim_start_matches("./")
            .to_string();
        let trimmed = match trimmed.strip_prefix("src/") {
            Some(stripped) => stripped.to_string(),
            None => trimmed,
        };
        if trimmed == rest {
            break;
        }
        rest = trimmed;
    }
    if rest.is_empty() || rest.ends_with('/') {
        return None;
    }
    Some(format!("/{}", rest))
}
