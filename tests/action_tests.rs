//! Manager action submission through the remote executor.

use asterisk_ami_calls::resolver::UserId;
use asterisk_ami_calls::{
    ActionClient, ExecutorError, JobPayload, JobRequest, ManagerAction, Notifier, RemoteExecutor,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

struct ScriptedExecutor {
    replies: Mutex<Vec<Result<JobPayload, ExecutorError>>>,
    jobs: Mutex<Vec<JobRequest>>,
}

impl ScriptedExecutor {
    fn new(replies: Vec<Result<JobPayload, ExecutorError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            jobs: Mutex::new(Vec::new()),
        })
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn submit(
        &self,
        job: JobRequest,
    ) -> Result<oneshot::Receiver<Result<JobPayload, ExecutorError>>, ExecutorError> {
        self.jobs
            .lock()
            .unwrap()
            .push(job);
        let (tx, rx) = oneshot::channel();
        let mut replies = self
            .replies
            .lock()
            .unwrap();
        if replies.is_empty() {
            drop(tx);
        } else {
            let _ = tx.send(replies.remove(0));
        }
        Ok(rx)
    }
}

#[derive(Default)]
struct RecordedNotices(Mutex<Vec<(UserId, String)>>);

impl Notifier for RecordedNotices {
    fn notify_user(&self, user: UserId, _title: &str, message: &str) {
        self.0
            .lock()
            .unwrap()
            .push((user, message.to_string()));
    }
}

#[tokio::test]
async fn ping_round_trip() {
    let executor = ScriptedExecutor::new(vec![Ok(JobPayload::ActionReply(
        json!({"Response": "Success", "Ping": "Pong"}),
    ))]);
    let client = ActionClient::new(executor.clone(), 5);

    let reply = client
        .submit(ManagerAction::ping(), None)
        .await
        .unwrap();
    assert_eq!(reply["Ping"], "Pong");

    let jobs = executor
        .jobs
        .lock()
        .unwrap();
    assert_eq!(jobs[0].fun, "asterisk.manager_action");
    assert_eq!(jobs[0].args[0]["Action"], "Ping");
}

#[tokio::test]
async fn originate_with_variables_reaches_the_agent() {
    let executor = ScriptedExecutor::new(vec![Ok(JobPayload::ActionReply(
        json!({"Response": "Success"}),
    ))]);
    let client = ActionClient::new(executor.clone(), 5);

    let action = ManagerAction::originate("SIP/1001", "5550001", "from-internal", "1001")
        .variable("CALL_ORIGIN", "crm");
    client
        .submit(action, Some(UserId(3)))
        .await
        .unwrap();

    let jobs = executor
        .jobs
        .lock()
        .unwrap();
    let sent = &jobs[0].args[0];
    assert_eq!(sent["Channel"], "SIP/1001");
    assert_eq!(sent["Variable"], json!(["CALL_ORIGIN=crm"]));
}

#[tokio::test]
async fn auth_expiry_retried_once() {
    let executor = ScriptedExecutor::new(vec![
        Err(ExecutorError::AuthExpired),
        Ok(JobPayload::ActionReply(json!({"Response": "Success"}))),
    ]);
    let client = ActionClient::new(executor.clone(), 5);

    client
        .submit(ManagerAction::reload(), None)
        .await
        .unwrap();
    assert_eq!(
        executor
            .jobs
            .lock()
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn failure_notifies_the_initiator() {
    let executor = ScriptedExecutor::new(vec![Err(ExecutorError::connection("reset by peer"))]);
    let notices = Arc::new(RecordedNotices::default());
    let client = ActionClient::new(executor, 5).with_notifier(notices.clone());

    let err = client
        .submit(ManagerAction::ping(), Some(UserId(3)))
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("reset by peer"));

    let notices = notices
        .0
        .lock()
        .unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].0, UserId(3));
}

#[tokio::test]
async fn failure_without_initiator_only_propagates() {
    let executor = ScriptedExecutor::new(vec![Err(ExecutorError::connection("reset by peer"))]);
    let notices = Arc::new(RecordedNotices::default());
    let client = ActionClient::new(executor, 5).with_notifier(notices.clone());

    assert!(client
        .submit(ManagerAction::ping(), None)
        .await
        .is_err());
    assert!(notices
        .0
        .lock()
        .unwrap()
        .is_empty());
}
