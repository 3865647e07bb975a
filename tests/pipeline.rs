//! End-to-end triage pipeline tests over in-memory collaborators.
//!
//! These pin the behavior the rest of the product depends on: the happy
//! path, redelivery semantics, the non-retriable dead ends, and the
//! classifier-unavailable fallback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use deskflow::adapters::{
    Classification, Classifier, ModeratorDirectory, Notifier, TicketRepository,
};
use deskflow::domain::{Account, Priority, Role, Ticket, TicketDelta, TicketStatus};
use deskflow::{matches_skill_pattern, RunDisposition, RunLog, RunOutcome, TriagePipeline};
use tempfile::TempDir;
use uuid::Uuid;

const BASE_URL: &str = "https://desk.example.com";

// ---------------------------------------------------------------------------
// In-memory collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemStore {
    tickets: Mutex<HashMap<Uuid, Ticket>>,
}

impl MemStore {
    fn with_ticket(ticket: Ticket) -> Arc<Self> {
        let store = Self::default();
        store.tickets.lock().unwrap().insert(ticket.id, ticket);
        Arc::new(store)
    }

    fn get(&self, id: Uuid) -> Option<Ticket> {
        self.tickets.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl TicketRepository for MemStore {
    async fn insert(&self, ticket: &Ticket) -> Result<()> {
        self.tickets
            .lock()
            .unwrap()
            .insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Ticket>> {
        Ok(self.get(id))
    }

    async fn update(&self, id: Uuid, delta: TicketDelta) -> Result<()> {
        let mut tickets = self.tickets.lock().unwrap();
        let ticket = tickets
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("ticket {} not found", id))?;
        ticket.apply(&delta);
        Ok(())
    }
}

struct StubClassifier {
    response: Option<Classification>,
    calls: AtomicUsize,
}

impl StubClassifier {
    fn returning(response: Option<Classification>) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, _title: &str, _description: &str) -> Result<Option<Classification>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

struct VecDirectory {
    accounts: Vec<Account>,
    pattern_calls: AtomicUsize,
}

impl VecDirectory {
    fn new(accounts: Vec<Account>) -> Arc<Self> {
        Arc::new(Self {
            accounts,
            pattern_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ModeratorDirectory for VecDirectory {
    async fn find_by_role_and_skill_pattern(
        &self,
        role: Role,
        related_skills: &[String],
    ) -> Result<Vec<Account>> {
        self.pattern_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .accounts
            .iter()
            .filter(|a| a.role == role && matches_skill_pattern(&a.skills, related_skills))
            .cloned()
            .collect())
    }

    async fn find_admin(&self) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .iter()
            .find(|a| a.role == Role::Admin)
            .cloned())
    }
}

struct RecordingNotifier {
    fail_next: AtomicUsize,
    calls: AtomicUsize,
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    /// Fail the first `n` send attempts, then succeed
    fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_next: AtomicUsize::new(n),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("mail API unreachable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn moderator(email: &str, skills: &[&str]) -> Account {
    Account::new(
        email.to_string(),
        Role::Moderator,
        skills.iter().map(|s| s.to_string()).collect(),
    )
}

fn admin(email: &str) -> Account {
    Account::new(email.to_string(), Role::Admin, Vec::new())
}

fn pipeline(
    store: Arc<MemStore>,
    classifier: Arc<StubClassifier>,
    directory: Arc<VecDirectory>,
    notifier: Arc<RecordingNotifier>,
) -> TriagePipeline {
    TriagePipeline::new(store, classifier, directory, notifier, BASE_URL.to_string())
}

async fn run_once(
    pipeline: &TriagePipeline,
    temp: &TempDir,
    run_id: Uuid,
    ticket_id: Uuid,
) -> RunDisposition {
    let log = RunLog::open_in(temp.path(), run_id).await.unwrap();
    pipeline.run_with_log(&log, run_id, ticket_id).await
}

fn expect_finished(disposition: RunDisposition) -> RunOutcome {
    match disposition {
        RunDisposition::Finished(outcome) => outcome,
        RunDisposition::Retry { error } => panic!("expected terminal disposition, got retry: {}", error),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_assigns_and_notifies() {
    let temp = TempDir::new().unwrap();
    let ticket = Ticket::new(
        "DB pool exhaustion".into(),
        "Connections pile up under load until the API stalls.".into(),
        Uuid::new_v4(),
    );
    let ticket_id = ticket.id;

    let store = MemStore::with_ticket(ticket);
    let classifier = StubClassifier::returning(Some(Classification {
        priority: Some("critical".into()),
        helpful_notes: Some("Check max_connections and pool sizing.".into()),
        related_skills: Some(vec!["database".into(), "postgres".into()]),
    }));
    let assignee = moderator("dba@example.com", &["postgres", "networking"]);
    let assignee_id = assignee.id;
    let directory = VecDirectory::new(vec![assignee, admin("root@example.com")]);
    let notifier = RecordingNotifier::new();

    let pipeline = pipeline(store.clone(), classifier, directory, notifier.clone());
    let outcome = expect_finished(run_once(&pipeline, &temp, Uuid::new_v4(), ticket_id).await);

    assert!(outcome.success);
    assert_eq!(outcome.assigned_to.as_deref(), Some("dba@example.com"));

    let ticket = store.get(ticket_id).unwrap();
    // "critical" is outside the allowed set and coerces to medium
    assert_eq!(ticket.priority, Priority::Medium);
    assert_eq!(ticket.status, TicketStatus::Assigned);
    assert_eq!(ticket.assigned_to, Some(assignee_id));
    assert_eq!(
        ticket.helpful_notes.as_deref(),
        Some("Check max_connections and pool sizing.")
    );
    assert_eq!(
        ticket.related_skills,
        vec!["database".to_string(), "postgres".to_string()]
    );

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (to, subject, body) = &sent[0];
    assert_eq!(to, "dba@example.com");
    assert_eq!(subject, "Ticket assigned");
    assert!(body.contains("DB pool exhaustion"));
    assert!(body.contains(&format!("{}/tickets/{}", BASE_URL, ticket_id)));
}

#[tokio::test]
async fn test_redelivery_reuses_memoized_steps() {
    let temp = TempDir::new().unwrap();
    let ticket = Ticket::new("t".into(), "d".into(), Uuid::new_v4());
    let ticket_id = ticket.id;

    let store = MemStore::with_ticket(ticket);
    let classifier = StubClassifier::returning(Some(Classification {
        priority: Some("high".into()),
        helpful_notes: None,
        related_skills: Some(vec!["postgres".into()]),
    }));
    let directory = VecDirectory::new(vec![moderator("dba@example.com", &["postgres"])]);
    let notifier = RecordingNotifier::new();

    let pipeline = pipeline(store, classifier.clone(), directory, notifier.clone());
    let run_id = Uuid::new_v4();

    let first = expect_finished(run_once(&pipeline, &temp, run_id, ticket_id).await);
    let second = expect_finished(run_once(&pipeline, &temp, run_id, ticket_id).await);

    assert!(first.success);
    assert!(second.success);

    // Neither the classifier nor the notifier ran twice
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_vanished_ticket_halts_without_notification() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemStore::default());
    let classifier = StubClassifier::returning(Some(Classification::default()));
    let directory = VecDirectory::new(vec![admin("root@example.com")]);
    let notifier = RecordingNotifier::new();

    let pipeline = pipeline(store, classifier.clone(), directory, notifier.clone());
    let outcome =
        expect_finished(run_once(&pipeline, &temp, Uuid::new_v4(), Uuid::new_v4()).await);

    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("ticket not found"));
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unavailable_classifier_falls_back_to_admin() {
    let temp = TempDir::new().unwrap();
    let ticket = Ticket::new("t".into(), "d".into(), Uuid::new_v4());
    let ticket_id = ticket.id;

    let store = MemStore::with_ticket(ticket);
    let classifier = StubClassifier::returning(None);
    let fallback = admin("root@example.com");
    let fallback_id = fallback.id;
    // The moderator pool must not matter when no skills were extracted
    let directory = VecDirectory::new(vec![moderator("dba@example.com", &["postgres"]), fallback]);
    let notifier = RecordingNotifier::new();

    let pipeline = pipeline(store.clone(), classifier, directory.clone(), notifier.clone());
    let outcome = expect_finished(run_once(&pipeline, &temp, Uuid::new_v4(), ticket_id).await);

    assert!(outcome.success);
    assert_eq!(outcome.assigned_to.as_deref(), Some("root@example.com"));

    let ticket = store.get(ticket_id).unwrap();
    assert_eq!(ticket.status, TicketStatus::Assigned);
    assert_eq!(ticket.assigned_to, Some(fallback_id));
    assert_eq!(ticket.priority, Priority::Medium);
    assert_eq!(ticket.helpful_notes.as_deref(), Some("No response"));
    assert!(ticket.related_skills.is_empty());

    // With no related skills the directory is never queried for a pool
    assert_eq!(directory.pattern_calls.load(Ordering::SeqCst), 0);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_assignee_leaves_ticket_in_progress() {
    let temp = TempDir::new().unwrap();
    let ticket = Ticket::new("t".into(), "d".into(), Uuid::new_v4());
    let ticket_id = ticket.id;

    let store = MemStore::with_ticket(ticket);
    let classifier = StubClassifier::returning(Some(Classification {
        priority: Some("high".into()),
        helpful_notes: None,
        related_skills: Some(vec!["kubernetes".into()]),
    }));
    // No matching moderator, no admin at all
    let directory = VecDirectory::new(vec![moderator("fe@example.com", &["frontend"])]);
    let notifier = RecordingNotifier::new();

    let pipeline = pipeline(store.clone(), classifier, directory, notifier.clone());
    let outcome = expect_finished(run_once(&pipeline, &temp, Uuid::new_v4(), ticket_id).await);

    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("no assignee available"));

    // The classification step's work is kept; the run just stops short
    let ticket = store.get(ticket_id).unwrap();
    assert_eq!(ticket.status, TicketStatus::InProgress);
    assert_eq!(ticket.assigned_to, None);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_notify_failure_retries_without_losing_assignment() {
    let temp = TempDir::new().unwrap();
    let ticket = Ticket::new("t".into(), "d".into(), Uuid::new_v4());
    let ticket_id = ticket.id;

    let store = MemStore::with_ticket(ticket);
    let classifier = StubClassifier::returning(Some(Classification {
        priority: Some("low".into()),
        helpful_notes: None,
        related_skills: Some(vec!["postgres".into()]),
    }));
    let assignee = moderator("dba@example.com", &["postgres"]);
    let assignee_id = assignee.id;
    let directory = VecDirectory::new(vec![assignee]);
    let notifier = RecordingNotifier::failing_first(1);

    let pipeline = pipeline(store.clone(), classifier.clone(), directory, notifier.clone());
    let run_id = Uuid::new_v4();

    let first = run_once(&pipeline, &temp, run_id, ticket_id).await;
    assert!(matches!(first, RunDisposition::Retry { .. }));

    // The assignment persisted before the notify failure
    let ticket = store.get(ticket_id).unwrap();
    assert_eq!(ticket.status, TicketStatus::Assigned);
    assert_eq!(ticket.assigned_to, Some(assignee_id));
    assert!(notifier.sent.lock().unwrap().is_empty());

    // Redelivery resumes at the notify step only
    let second = expect_finished(run_once(&pipeline, &temp, run_id, ticket_id).await);
    assert!(second.success);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
}
