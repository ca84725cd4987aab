//! Session refresh and token stamping, including concurrent execution
//! slots sharing one task-user session broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use quarry_core::config::WorkerConfig;
use quarry_core::fault::FaultDomain;
use quarry_core::log::MemoryTaskLog;
use quarry_core::payload::TaskPayload;
use quarry_core::task::{Task, TaskId};
use quarry_worker::feature::TaskFeature;
use quarry_worker::identity::provider::SessionTokenIdentity;
use quarry_worker::identity::session::{LoginSession, SessionBackend, SessionBroker, SessionError};
use quarry_worker::identity::{GroupAdmin, IdentityError, OsGroup, TaskCredentials};
use quarry_worker::isolation::{IsolationError, OsGroups};
use quarry_worker::launch::LaunchSpec;
use secrecy::SecretString;

/// Backend minting distinct session handles, optionally holding the
/// platform call open to widen race windows.
#[derive(Debug, Default)]
struct CountingBackend {
    logons: AtomicU64,
    hold: Option<Duration>,
}

impl CountingBackend {
    fn slow(hold: Duration) -> Self {
        Self {
            logons: AtomicU64::new(0),
            hold: Some(hold),
        }
    }
}

impl SessionBackend for CountingBackend {
    fn establish(&self, user: &str, _secret: &SecretString) -> Result<LoginSession, SessionError> {
        let n = self.logons.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hold) = self.hold {
            thread::sleep(hold);
        }
        Ok(LoginSession::new(user, 0x4000 + n))
    }
}

/// Backend that always refuses the logon.
#[derive(Debug)]
struct DenyingBackend;

impl SessionBackend for DenyingBackend {
    fn establish(&self, user: &str, _secret: &SecretString) -> Result<LoginSession, SessionError> {
        Err(SessionError::EstablishFailed {
            user: user.to_string(),
            reason: "logon denied by platform".to_string(),
        })
    }
}

/// Group admin for a host with no groups; session tests never edit
/// membership.
#[derive(Debug)]
struct BareHost;

impl GroupAdmin for BareHost {
    fn lookup(&self, _name: &str) -> Result<Option<OsGroup>, IdentityError> {
        Ok(None)
    }

    fn add_member(&self, _user: &str, _group: &OsGroup) -> Result<(), IdentityError> {
        Ok(())
    }

    fn remove_member(&self, _user: &str, _group: &OsGroup) -> Result<(), IdentityError> {
        Ok(())
    }
}

fn credentials() -> TaskCredentials {
    TaskCredentials::new("task-11", SecretString::from("correct-horse".to_string()))
}

fn tokenless_specs(count: usize) -> Vec<LaunchSpec> {
    (0..count)
        .map(|i| LaunchSpec::new("bash").with_args(vec!["-c".to_string(), format!("step-{i}")]))
        .collect()
}

fn command_task() -> Arc<Task> {
    let payload = TaskPayload {
        os_groups: Vec::new(),
        command: vec![vec!["run-build".to_string()]],
    };
    Arc::new(Task::new(
        TaskId::new("Qm3tRz8LpVxY"),
        payload,
        Arc::new(MemoryTaskLog::new()),
    ))
}

// ── Broker semantics ──

#[test]
fn stamp_pass_is_uniform_and_matches_the_broker_state() {
    let broker = SessionBroker::new(CountingBackend::default());
    broker.install_user(credentials()).unwrap();

    let mut specs = tokenless_specs(3);
    let token = broker.refresh_and_stamp(&mut specs).unwrap();

    assert!(specs.iter().all(|s| s.access_token() == Some(token)));
    assert_eq!(broker.current_token().unwrap(), Some(token));
    assert_eq!(broker.session_generation().unwrap(), token.generation());
}

#[test]
fn restamping_replaces_every_older_token() {
    let broker = SessionBroker::new(CountingBackend::default());
    broker.install_user(credentials()).unwrap();

    let mut specs = tokenless_specs(4);
    let first = broker.refresh_and_stamp(&mut specs).unwrap();
    let second = broker.refresh_and_stamp(&mut specs).unwrap();

    assert_ne!(first, second);
    assert_eq!(second.generation(), first.generation() + 1);
    assert!(
        specs.iter().all(|s| s.access_token() == Some(second)),
        "no descriptor may keep a token from an earlier session"
    );
}

#[test]
fn concurrent_slots_never_interleave_refresh_and_stamp() {
    let broker = Arc::new(SessionBroker::new(CountingBackend::slow(
        Duration::from_millis(25),
    )));
    broker.install_user(credentials()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let broker = Arc::clone(&broker);
        handles.push(thread::spawn(move || {
            let mut specs = tokenless_specs(4);
            let token = broker.refresh_and_stamp(&mut specs).unwrap();
            let stamped: Vec<_> = specs.iter().map(|s| s.access_token()).collect();
            (token, stamped)
        }));
    }

    let mut generations = Vec::new();
    for handle in handles {
        let (token, stamped) = handle.join().unwrap();
        // Every descriptor in one slot's batch carries that slot's token.
        assert!(stamped.iter().all(|t| *t == Some(token)));
        generations.push(token.generation());
    }

    generations.sort_unstable();
    assert_eq!(generations, vec![1, 2], "each refresh gets its own generation");
    assert_eq!(broker.session_generation().unwrap(), 2);
}

// ── Manager wiring ──

#[test]
fn launch_preparation_stamps_even_without_group_requests() {
    let provider = Arc::new(SessionTokenIdentity::new(BareHost, CountingBackend::default()));
    provider.broker().install_user(credentials()).unwrap();

    let task = command_task();
    let config = Arc::new(WorkerConfig::default());
    let mut feature = OsGroups::new(task, config, Arc::clone(&provider), "task-11");

    let outcome = feature.start().unwrap();
    assert!(!outcome.was_applied());

    let mut specs = tokenless_specs(2);
    feature.update_commands(&mut specs).unwrap();
    let token = provider.broker().current_token().unwrap().unwrap();
    assert_eq!(token.generation(), 1);
    assert!(specs.iter().all(|s| s.access_token() == Some(token)));
}

#[test]
fn current_user_mode_never_touches_the_session() {
    let backend = CountingBackend::default();
    let provider = Arc::new(SessionTokenIdentity::new(BareHost, backend));
    provider.broker().install_user(credentials()).unwrap();

    let task = command_task();
    let config = Arc::new(WorkerConfig {
        run_tasks_as_current_user: true,
        ..WorkerConfig::default()
    });
    let feature = OsGroups::new(task, config, Arc::clone(&provider), "task-11");

    let mut specs = tokenless_specs(2);
    feature.update_commands(&mut specs).unwrap();

    assert!(specs.iter().all(|s| s.access_token().is_none()));
    assert!(provider.broker().current_token().unwrap().is_none());
    assert_eq!(provider.broker().session_generation().unwrap(), 0);
}

#[test]
fn refresh_failure_is_fatal_before_any_command() {
    let provider = Arc::new(SessionTokenIdentity::new(BareHost, DenyingBackend));
    provider.broker().install_user(credentials()).unwrap();

    let task = command_task();
    let config = Arc::new(WorkerConfig::default());
    let feature = OsGroups::new(task, config, provider, "task-11");

    let mut specs = tokenless_specs(2);
    let err = feature.update_commands(&mut specs).unwrap_err();
    assert!(
        matches!(&err, IsolationError::SessionRefresh { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(err.fault_domain(), FaultDomain::Worker);
    assert!(
        specs.iter().all(|s| s.access_token().is_none()),
        "no descriptor may be stamped by a failed refresh"
    );
}

#[test]
fn refresh_before_provisioning_is_reported() {
    let provider = SessionTokenIdentity::new(BareHost, CountingBackend::default());
    let err = provider.broker().refresh().unwrap_err();
    assert!(matches!(err, SessionError::NoTaskUser), "unexpected error: {err}");
}

#[test]
fn secrets_stay_out_of_establish_failures() {
    let broker = SessionBroker::new(DenyingBackend);
    broker
        .install_user(TaskCredentials::new(
            "task-11",
            SecretString::from("hunter2".to_string()),
        ))
        .unwrap();
    let err = broker.refresh().unwrap_err();
    let message = err.to_string();
    assert!(!message.contains("hunter2"), "error leaked the secret: {message}");
    assert!(message.contains("task-11"), "error should name the user: {message}");
}

#[test]
fn logon_happens_once_per_update_pass() {
    let provider = Arc::new(SessionTokenIdentity::new(BareHost, CountingBackend::default()));
    provider.broker().install_user(credentials()).unwrap();

    let task = command_task();
    let config = Arc::new(WorkerConfig::default());
    let feature = OsGroups::new(task, config, Arc::clone(&provider), "task-11");

    let mut specs = tokenless_specs(5);
    feature.update_commands(&mut specs).unwrap();
    feature.update_commands(&mut specs).unwrap();

    assert_eq!(provider.broker().session_generation().unwrap(), 2);
}
