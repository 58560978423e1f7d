//! Remote job executor contract.
//!
//! The tracker never talks to the PBX host directly.  Side effects go
//! through a [`RemoteExecutor`]: jobs are submitted fire-and-forget and the
//! reply, if any, arrives later on the returned oneshot channel.  The
//! transport behind the trait is the embedding's concern.

use crate::constants::{FUN_DELETE_FILE, FUN_GET_FILE, FUN_MANAGER_ACTION};
use crate::error::ExecutorError;
use crate::resolver::UserId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::warn;

/// A job for the remote PBX agent: a function name plus JSON arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Agent-side function, e.g. `asterisk.manager_action`
    pub fun: String,
    pub args: serde_json::Value,
    /// Opaque correlation payload echoed back with the reply
    pub pass_back: serde_json::Value,
}

impl JobRequest {
    /// Fetch a file from the PBX host.
    pub fn get_file(path: &str) -> Self {
        Self {
            fun: FUN_GET_FILE.to_string(),
            args: json!([path]),
            pass_back: serde_json::Value::Null,
        }
    }

    /// Delete a file on the PBX host.
    pub fn delete_file(path: &str) -> Self {
        Self {
            fun: FUN_DELETE_FILE.to_string(),
            args: json!([path]),
            pass_back: serde_json::Value::Null,
        }
    }

    /// Submit an AMI action to the Asterisk manager.
    pub fn manager_action(action: serde_json::Value) -> Self {
        Self {
            fun: FUN_MANAGER_ACTION.to_string(),
            args: json!([action]),
            pass_back: serde_json::Value::Null,
        }
    }

    /// Attach a correlation payload echoed back with the reply.
    pub fn with_pass_back(mut self, pass_back: serde_json::Value) -> Self {
        self.pass_back = pass_back;
        self
    }
}

/// Reply payload of a completed remote job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    /// Raw file contents from `asterisk.get_file`
    FileData(Vec<u8>),
    /// Manager reply map from `asterisk.manager_action`
    ActionReply(serde_json::Value),
    /// The job ran but produced nothing, e.g. `asterisk.delete_file`
    Done,
}

/// Receiving side of a submitted job's reply channel.
pub type JobReply = oneshot::Receiver<Result<JobPayload, ExecutorError>>;

/// Transport to the remote PBX agent.
///
/// `submit` must not block on the job completing; it only hands the job to
/// the transport and returns the reply channel.
pub trait RemoteExecutor: Send + Sync {
    fn submit(&self, job: JobRequest) -> Result<JobReply, ExecutorError>;
}

/// Delivery channel for user-facing notices, e.g. an originate failure.
pub trait Notifier: Send + Sync {
    fn notify_user(&self, user: UserId, title: &str, message: &str);
}

/// Submit a job and await its reply with a timeout.
///
/// An `AuthExpired` reply means the agent's session lapsed between jobs;
/// the agent re-authenticates on the next submission, so the job is
/// resubmitted exactly once before the error propagates.
pub async fn run_job(
    executor: &dyn RemoteExecutor,
    job: JobRequest,
    timeout_secs: u64,
) -> Result<JobPayload, ExecutorError> {
    match await_reply(executor, job.clone(), timeout_secs).await {
        Err(err) if err.is_auth_expired() => {
            warn!("Remote session expired, resubmitting {}", job.fun);
            await_reply(executor, job, timeout_secs).await
        }
        other => other,
    }
}

async fn await_reply(
    executor: &dyn RemoteExecutor,
    job: JobRequest,
    timeout_secs: u64,
) -> Result<JobPayload, ExecutorError> {
    let reply = executor.submit(job)?;
    match timeout(Duration::from_secs(timeout_secs), reply).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ExecutorError::connection("reply channel closed")),
        Err(_) => Err(ExecutorError::Timeout { timeout_secs }),
    }
}
