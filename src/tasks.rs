use std::path::PathBuf;

use log::{info, warn};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::TaskConfig;
use crate::error::AppError;
use crate::exec::{ExecutionLog, ExecutionRequest};

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub command: String,
    pub failure_codes: Vec<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: String,
    pub exit_code: i32,
    pub log_file: PathBuf,
    pub log: ExecutionLog,
}

pub struct TaskRunner {
    tasks: FxHashMap<String, TaskConfig>,
    log_dir: PathBuf,
}

impl TaskRunner {
    pub fn new(tasks: FxHashMap<String, TaskConfig>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks,
            log_dir: log_dir.into(),
        }
    }

    pub fn list(&self) -> Vec<TaskSummary> {
        let mut tasks: Vec<TaskSummary> = self
            .tasks
            .iter()
            .map(|(name, task)| TaskSummary {
                name: name.clone(),
                command: task.command.clone(),
                failure_codes: task.failure_codes.clone(),
            })
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    fn log_path(&self, name: &str, task: &TaskConfig) -> PathBuf {
        match &task.log_file {
            Some(file) => self.log_dir.join(file),
            None => self.log_dir.join(format!("{name}.log")),
        }
    }

    pub async fn run(&self, name: &str) -> Result<TaskReport, AppError> {
        let task = self
            .tasks
            .get(name)
            .ok_or_else(|| AppError::NotFoundTask(name.to_string()))?;

        tokio::fs::create_dir_all(&self.log_dir)
            .await
            .map_err(|e| AppError::io(&self.log_dir, e))?;
        let log_path = self.log_path(name, task);

        info!("Running task {name}: {}", task.command);
        let outcome = ExecutionRequest::new(task.command.as_str())
            .with_failure_codes(task.failure_codes.iter().copied())
            .run()
            .await;

        let log = match &outcome {
            Ok(log) => log,
            Err(e) => e.log(),
        };
        tokio::fs::write(&log_path, log.as_str())
            .await
            .map_err(|e| AppError::io(&log_path, e))?;

        match outcome {
            Ok(log) => {
                info!("Task {name} finished, log written to {}", log_path.display());
                Ok(TaskReport {
                    task: name.to_string(),
                    // a successful run always exited with a code
                    exit_code: log.exit_code().unwrap_or(0),
                    log_file: log_path,
                    log,
                })
            }
            Err(e) => {
                warn!("Task {name} failed: {e}");
                Err(AppError::TaskFailed {
                    task: name.to_string(),
                    log_path,
                })
            }
        }
    }
}
