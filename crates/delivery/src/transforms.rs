//! Built-in transform functions

use std::process::Stdio;

use bytes::Bytes;
use chrono::Utc;
use contracts::{TransformConfig, TransformError, TransformFunction};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

/// Passes payloads through unchanged.
#[derive(Debug, Clone, Default)]
pub struct IdentityTransform;

impl TransformFunction for IdentityTransform {
    fn name(&self) -> &str {
        "identity"
    }

    async fn apply(&self, payload: Bytes) -> Result<Bytes, TransformError> {
        Ok(payload)
    }
}

/// Requires each payload to be a JSON object and optionally stamps the
/// processing time into `stamp_field`.
#[derive(Debug, Clone, Default)]
pub struct JsonTransform {
    stamp_field: Option<String>,
}

impl JsonTransform {
    pub fn new(stamp_field: Option<String>) -> Self {
        Self { stamp_field }
    }
}

impl TransformFunction for JsonTransform {
    fn name(&self) -> &str {
        "json"
    }

    async fn apply(&self, payload: Bytes) -> Result<Bytes, TransformError> {
        let mut value: serde_json::Value = serde_json::from_slice(&payload)
            .map_err(|e| TransformError::permanent(format!("malformed JSON: {e}")).with_code("MalformedJson"))?;
        let Some(object) = value.as_object_mut() else {
            return Err(TransformError::permanent("payload is not a JSON object").with_code("NotAnObject"));
        };
        let Some(field) = &self.stamp_field else {
            return Ok(payload);
        };
        object.insert(field.clone(), serde_json::Value::String(Utc::now().to_rfc3339()));
        serde_json::to_vec(&value)
            .map(Bytes::from)
            .map_err(|e| TransformError::permanent(format!("re-encode failed: {e}")))
    }
}

/// Pipes each payload through an external command: payload on stdin, result
/// on stdout. A spawn failure is transient; a non-zero exit is permanent.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    program: String,
    args: Vec<String>,
}

impl CommandTransform {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl TransformFunction for CommandTransform {
    fn name(&self) -> &str {
        &self.program
    }

    async fn apply(&self, payload: Bytes) -> Result<Bytes, TransformError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransformError::transient(format!("spawn '{}' failed: {e}", self.program)))?;

        // Feed stdin while stdout is drained, or a command that echoes a
        // large payload blocks on a full pipe. Dropping stdin sends EOF.
        let stdin = child.stdin.take();
        let program = self.program.as_str();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The command may exit without reading its input; its exit status decides.
                if let Err(e) = stdin.write_all(&payload).await {
                    trace!(program, error = %e, "stdin write interrupted");
                }
            }
        };

        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output
            .map_err(|e| TransformError::transient(format!("wait on '{}' failed: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransformError::permanent(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ))
            .with_code("CommandFailed"));
        }

        let mut stdout = output.stdout;
        while stdout.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            stdout.pop();
        }
        Ok(Bytes::from(stdout))
    }
}

/// Wraps a synchronous closure.
pub struct FnTransform<F> {
    name: String,
    f: F,
}

impl<F> FnTransform<F>
where
    F: Fn(Bytes) -> Result<Bytes, TransformError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> TransformFunction for FnTransform<F>
where
    F: Fn(Bytes) -> Result<Bytes, TransformError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, payload: Bytes) -> Result<Bytes, TransformError> {
        (self.f)(payload)
    }
}

/// Transform selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredTransform {
    Identity(IdentityTransform),
    Json(JsonTransform),
    Command(CommandTransform),
}

impl ConfiguredTransform {
    pub fn from_config(config: &TransformConfig) -> Self {
        match config {
            TransformConfig::Identity => Self::Identity(IdentityTransform),
            TransformConfig::Json { stamp_field } => {
                Self::Json(JsonTransform::new(stamp_field.clone()))
            }
            TransformConfig::Command { program, args } => {
                Self::Command(CommandTransform::new(program.clone(), args.clone()))
            }
        }
    }
}

impl TransformFunction for ConfiguredTransform {
    fn name(&self) -> &str {
        match self {
            Self::Identity(t) => t.name(),
            Self::Json(t) => t.name(),
            Self::Command(t) => t.name(),
        }
    }

    async fn apply(&self, payload: Bytes) -> Result<Bytes, TransformError> {
        match self {
            Self::Identity(t) => t.apply(payload).await,
            Self::Json(t) => t.apply(payload).await,
            Self::Command(t) => t.apply(payload).await,
        }
    }
}
