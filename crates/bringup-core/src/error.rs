use std::time::Duration;
use thiserror::Error;

use crate::outcome::FailureKind;

#[derive(Debug, Error)]
pub enum BringupError {
    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("'{argv}' exited with code {exit_code}{}", format_output(.output))]
    ExternalCommand {
        argv: String,
        exit_code: i32,
        output: String,
    },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {}s waiting for {what}", .after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("{resource} rejected: {reason}")]
    ResourceApply { resource: String, reason: String },

    #[error("cluster '{0}' already exists")]
    ClusterConflict(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn format_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl BringupError {
    /// Position of this error in the failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            BringupError::MissingInput(_) | BringupError::ConfigNotFound(_) => {
                FailureKind::MissingInput
            }
            BringupError::ExternalCommand { .. }
            | BringupError::Spawn { .. }
            | BringupError::Io(_) => FailureKind::ExternalCommand,
            BringupError::Timeout { .. } => FailureKind::Timeout,
            BringupError::ResourceApply { .. }
            | BringupError::Yaml(_)
            | BringupError::Json(_) => FailureKind::ResourceApply,
            BringupError::ClusterConflict(_) => FailureKind::ClusterConflict,
        }
    }

    /// Whether re-invoking the whole command later may succeed.
    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }
}

pub type Result<T> = std::result::Result<T, BringupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_command_message_includes_output() {
        let err = BringupError::ExternalCommand {
            argv: "kubectl apply -f -".to_string(),
            exit_code: 1,
            output: "  connection refused\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "'kubectl apply -f -' exited with code 1: connection refused"
        );
        assert_eq!(err.kind(), FailureKind::ExternalCommand);
        assert!(err.retryable());
    }

    #[test]
    fn external_command_message_without_output() {
        let err = BringupError::ExternalCommand {
            argv: "helm repo update".to_string(),
            exit_code: 2,
            output: String::new(),
        };
        assert_eq!(err.to_string(), "'helm repo update' exited with code 2");
    }

    #[test]
    fn missing_input_is_not_retryable() {
        let err = BringupError::MissingInput("--api-key or DD_API_KEY required".into());
        assert_eq!(err.kind(), FailureKind::MissingInput);
        assert!(!err.retryable());
    }

    #[test]
    fn timeout_reports_seconds() {
        let err = BringupError::Timeout {
            what: "deployments in 'pets'".into(),
            after: Duration::from_secs(300),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 300s waiting for deployments in 'pets'"
        );
        assert!(err.retryable());
    }
}
