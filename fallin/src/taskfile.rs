//! Task files for the manager command
//!
//! A task file is YAML (or JSON) holding either a bare list of tasks or a map
//! with a `tasks` key. Tasks without an `id` get a generated one.

use std::fs;
use std::path::Path;

use eyre::{Context, Result, eyre};
use serde::Deserialize;
use tracing::debug;

use crate::protocol::Task;

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    List(Vec<Task>),
    Wrapped { tasks: Vec<Task> },
}

/// Parse tasks from file content
pub fn parse_tasks(content: &str) -> Result<Vec<Task>> {
    let tasks = match serde_yaml::from_str(content).context("Failed to parse task file")? {
        TaskFile::List(tasks) | TaskFile::Wrapped { tasks } => tasks,
    };
    if let Some(task) = tasks.iter().find(|t| t.id.trim().is_empty()) {
        return Err(eyre!("Task with blank id ({} steps)", task.steps.len()));
    }
    Ok(tasks)
}

/// Load tasks from a file
pub fn load_tasks(path: impl AsRef<Path>) -> Result<Vec<Task>> {
    let path = path.as_ref();
    debug!(path = %path.display(), "load_tasks: called");
    let content = fs::read_to_string(path).context(format!("Failed to read task file {}", path.display()))?;
    parse_tasks(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Operation;
    use tempfile::TempDir;

    #[test]
    fn test_parse_yaml_list() {
        let tasks = parse_tasks(
            r#"
- id: ctg-120
  steps:
    - op: ts-solve
      contingency: My Transient Contingency
    - op: ts-get-results
      contingency: My Transient Contingency
      fields: ["Bus 4 | frequency"]
- steps:
    - op: solve-power-flow
"#,
        )
        .unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "ctg-120");
        assert_eq!(tasks[0].steps[0].name(), "ts-solve");
        assert!(!tasks[1].id.is_empty());
        assert_eq!(
            tasks[1].steps,
            vec![Operation::SolvePowerFlow {
                method: "RECTNEWT".to_string()
            }]
        );
    }

    #[test]
    fn test_parse_wrapped_json() {
        let tasks = parse_tasks(r#"{"tasks": [{"id": "a", "steps": [{"op": "save-case"}]}]}"#).unwrap();
        assert_eq!(tasks[0].id, "a");
        assert_eq!(tasks[0].steps, vec![Operation::SaveCase { path: None }]);
    }

    #[test]
    fn test_rejects_bad_files() {
        assert!(parse_tasks("- steps: [{op: launch-rockets}]").is_err());
        assert!(parse_tasks("- id: ' '\n  steps: []\n").is_err());

        let temp = TempDir::new().unwrap();
        assert!(load_tasks(temp.path().join("none.yml")).is_err());
    }
}
