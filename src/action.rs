//! AMI manager actions submitted through the remote executor.

use crate::error::{TrackerError, TrackerResult};
use crate::executor::{run_job, JobPayload, JobRequest, Notifier, RemoteExecutor};
use crate::resolver::UserId;
use indexmap::IndexMap;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// One AMI action, e.g. Originate or Ping, built header by header.
///
/// Headers keep insertion order; Asterisk does not require it but ordered
/// output keeps logs and tests readable.
#[derive(Debug, Clone)]
pub struct ManagerAction {
    name: String,
    headers: IndexMap<String, String>,
    variables: IndexMap<String, String>,
}

impl ManagerAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headers: IndexMap::new(),
            variables: IndexMap::new(),
        }
    }

    /// Originate a call from a user's channel to an extension.
    pub fn originate(
        channel: &str,
        exten: &str,
        context: &str,
        caller_id: &str,
    ) -> Self {
        Self::new("Originate")
            .header("Channel", channel)
            .header("Exten", exten)
            .header("Context", context)
            .header("Priority", "1")
            .header("CallerID", caller_id)
            .header("Async", "true")
    }

    pub fn ping() -> Self {
        Self::new("Ping")
    }

    pub fn reload() -> Self {
        Self::new("Reload")
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into(), value.into());
        self
    }

    /// Add a channel variable, sent as `Variable: name=value`.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .insert(name.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flat JSON map the remote agent feeds to the manager.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("Action".to_string(), json!(self.name));
        for (name, value) in &self.headers {
            map.insert(name.clone(), json!(value));
        }
        if !self
            .variables
            .is_empty()
        {
            let pairs: Vec<String> = self
                .variables
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            map.insert("Variable".to_string(), json!(pairs));
        }
        serde_json::Value::Object(map)
    }
}

/// Submits manager actions and surfaces failures to the initiating user.
pub struct ActionClient {
    executor: Arc<dyn RemoteExecutor>,
    notifier: Option<Arc<dyn Notifier>>,
    timeout_secs: u64,
}

impl ActionClient {
    pub fn new(executor: Arc<dyn RemoteExecutor>, timeout_secs: u64) -> Self {
        Self {
            executor,
            notifier: None,
            timeout_secs,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Submit `action` and await the manager's reply map.
    ///
    /// Errors are reported to `initiator` when a notifier is wired, then
    /// propagated to the caller.  An auth-expiry retry happens once inside
    /// the job runner; nothing else is retried.
    pub async fn submit(
        &self,
        action: ManagerAction,
        initiator: Option<UserId>,
    ) -> TrackerResult<serde_json::Value> {
        info!("Submitting manager action {}", action.name());
        let job = JobRequest::manager_action(action.to_json());
        let payload = match run_job(
            self.executor
                .as_ref(),
            job,
            self.timeout_secs,
        )
        .await
        {
            Ok(payload) => payload,
            Err(err) => {
                error!("Manager action {} failed: {}", action.name(), err);
                if let (Some(notifier), Some(user)) = (&self.notifier, initiator) {
                    notifier.notify_user(
                        user,
                        "PBX action failed",
                        &format!("{}: {}", action.name(), err),
                    );
                }
                return Err(err.into());
            }
        };
        match payload {
            JobPayload::ActionReply(reply) => Ok(reply),
            other => Err(TrackerError::UnexpectedResponse {
                response: format!("{:?}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn originate_action_shape() {
        let action = ManagerAction::originate("SIP/1001", "5550001", "from-internal", "1001")
            .variable("SIPADDHEADER", "Call-Info: answer-after=0")
            .variable("CALL_ORIGIN", "crm");
        let value = action.to_json();
        assert_eq!(value["Action"], "Originate");
        assert_eq!(value["Channel"], "SIP/1001");
        assert_eq!(value["Exten"], "5550001");
        assert_eq!(value["Async"], "true");
        assert_eq!(
            value["Variable"],
            json!(["SIPADDHEADER=Call-Info: answer-after=0", "CALL_ORIGIN=crm"])
        );
    }

    #[test]
    fn plain_action_omits_variables() {
        let value = ManagerAction::ping().to_json();
        assert_eq!(value["Action"], "Ping");
        assert!(value
            .get("Variable")
            .is_none());
    }
}
