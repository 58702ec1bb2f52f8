//! File Plan
//!
//! Turns the planner's approximately-JSON answer into a validated
//! [`FilePlan`]. Every plan contains the entry component and the global
//! stylesheet.

use codeforge_core::recover;
use serde_json::Value;

use crate::models::artifact::{
    normalize_path, FilePlanEntry, DEFAULT_PROJECT_TITLE, ENTRY_FILE, STYLESHEET_FILE,
};

const ENTRY_DESCRIPTION: &str = "Root React component that composes the page";
const STYLESHEET_DESCRIPTION: &str = "Global styles with the Tailwind base, components and utilities directives";

/// The accepted file plan of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlan {
    pub project_title: String,
    pub explanation: String,
    pub entries: Vec<FilePlanEntry>,
}

impl FilePlan {
    /// The plan used when planning fails outright
    pub fn default_plan() -> Self {
        let mut plan = Self {
            project_title: DEFAULT_PROJECT_TITLE.to_string(),
            explanation: String::new(),
            entries: Vec::new(),
        };
        plan.ensure_required_entries();
        plan
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }

    /// Put the entry file first and the stylesheet last if either is missing
    pub fn ensure_required_entries(&mut self) {
        if !self.entries.iter().any(|e| e.path == ENTRY_FILE) {
            self.entries
                .insert(0, FilePlanEntry::new(ENTRY_FILE, ENTRY_DESCRIPTION));
        }
        if !self.entries.iter().any(|e| e.path == STYLESHEET_FILE) {
            self.entries
                .push(FilePlanEntry::new(STYLESHEET_FILE, STYLESHEET_DESCRIPTION));
        }
    }
}

/// Parse a planner response.
///
/// Accepts `{projectTitle?, explanation?, files: [...]}`, the same object
/// with the list under `plan`, or a bare list. Entries need a non-empty path
/// and description; paths are normalized and de-duplicated. Returns `None`
/// when no entry survives.
pub fn parse_plan(raw: &str) -> Option<FilePlan> {
    let value = recover(raw).into_value()?;

    let (object, list) = match &value {
        Value::Array(list) => (None, list),
        Value::Object(object) => {
            let list = object
                .get("files")
                .or_else(|| object.get("plan"))
                .and_then(Value::as_array)?;
            (Some(object), list)
        }
        _ => return None,
    };

    let mut entries: Vec<FilePlanEntry> = Vec::new();
    for item in list {
        let Some(entry) = parse_entry(item) else {
            continue;
        };
        if !entries.iter().any(|e| e.path == entry.path) {
            entries.push(entry);
        }
    }
    if entries.is_empty() {
        return None;
    }

    let text = |key: &str| {
        object
            .and_then(|o| o.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let mut plan = FilePlan {
        project_title: text("projectTitle")
            .unwrap_or(DEFAULT_PROJECT_TITLE)
            .to_string(),
        explanation: text("explanation").unwrap_or("").to_string(),
        entries,
    };
    plan.ensure_required_entries();
    Some(plan)
}

fn parse_entry(item: &Value) -> Option<FilePlanEntry> {
    let path = item.get("path")?.as_str()?;
    let description = item.get("description")?.as_str()?.trim();
    if description.is_empty() {
        return None;
    }
    Some(FilePlanEntry::new(normalize_path(path)?, description))
}
