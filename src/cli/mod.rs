//! Command-line interface for deskflow.
//!
//! Provides commands for creating tickets and accounts, enqueueing triage
//! events, draining the queue as a worker, and inspecting runs.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{
    FileDirectory, FileTicketStore, HttpClassifier, HttpMailer, TicketRepository,
};
use crate::config;
use crate::core::{RunDisposition, RunLog, TriagePipeline};
use crate::domain::{
    Account, Role, Run, Ticket, TicketDelta, TicketResponse, TicketStatus,
};
use crate::ingest::{QueueItem, TriageQueue};

/// deskflow - event-sourced ticket triage and assignment pipeline
#[derive(Parser, Debug)]
#[command(name = "deskflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and inspect tickets
    #[command(subcommand)]
    Ticket(TicketCommands),

    /// Manage accounts
    #[command(subcommand)]
    Account(AccountCommands),

    /// Enqueue a triage event for a ticket and process the backlog
    Triage {
        /// Ticket ID
        ticket_id: Uuid,
    },

    /// Drain the triage queue
    Worker {
        /// Process the current backlog and exit
        #[arg(long)]
        once: bool,
    },

    /// Show the state of a run
    Status {
        /// Run ID (UUID)
        run_id: Uuid,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum TicketCommands {
    /// Create a ticket and queue it for triage
    New {
        /// Short summary
        #[arg(short, long)]
        title: String,

        /// Full problem description
        #[arg(short, long)]
        description: String,

        /// Account id of the reporter
        #[arg(long)]
        created_by: Option<Uuid>,
    },

    /// Show a ticket
    Show {
        /// Ticket ID
        ticket_id: Uuid,
    },

    /// Record a response; the ticket moves to RESOLVED
    Respond {
        /// Ticket ID
        ticket_id: Uuid,

        /// Response text
        #[arg(short, long)]
        text: String,

        /// Account id of the responder (defaults to the assignee)
        #[arg(long)]
        created_by: Option<Uuid>,
    },

    /// Accept the response; the ticket moves to CLOSED
    Close {
        /// Ticket ID
        ticket_id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum AccountCommands {
    /// Add an account
    Add {
        /// Notification address
        #[arg(long)]
        email: String,

        /// user, moderator, or admin
        #[arg(long, default_value = "user")]
        role: String,

        /// Comma-separated skill list
        #[arg(long, value_delimiter = ',')]
        skills: Vec<String>,
    },

    /// List accounts
    List,
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Ticket(cmd) => execute_ticket(cmd).await,
            Commands::Account(cmd) => execute_account(cmd).await,
            Commands::Triage { ticket_id } => execute_triage(ticket_id).await,
            Commands::Worker { once } => execute_worker(once).await,
            Commands::Status { run_id } => execute_status(run_id).await,
            Commands::Runs { limit } => execute_runs(limit).await,
        }
    }
}

/// Build the pipeline over the configured collaborators
fn build_pipeline(store: Arc<FileTicketStore>, directory: Arc<FileDirectory>) -> Result<TriagePipeline> {
    let cfg = config::config()?;

    let classifier = cfg
        .classifier
        .as_ref()
        .map(HttpClassifier::from_config)
        .context("classifier endpoint not configured (.deskflow/config.yaml, section `classifier`)")?;

    let mailer = cfg
        .mailer
        .as_ref()
        .map(HttpMailer::from_config)
        .context("mailer not configured (.deskflow/config.yaml, section `mailer`)")?;

    Ok(TriagePipeline::new(
        store,
        Arc::new(classifier),
        directory,
        Arc::new(mailer),
        cfg.base_url.clone(),
    ))
}

async fn execute_ticket(cmd: TicketCommands) -> Result<()> {
    let store = FileTicketStore::open().await?;

    match cmd {
        TicketCommands::New {
            title,
            description,
            created_by,
        } => {
            let ticket = Ticket::new(
                title,
                description,
                created_by.unwrap_or_else(Uuid::new_v4),
            );
            store.insert(&ticket).await?;

            let queue = TriageQueue::open_default().await?;
            queue.enqueue(ticket.id).await?;

            info!(ticket_id = %ticket.id, "ticket created and queued for triage");
            println!("{}", serde_json::to_string_pretty(&ticket)?);
            Ok(())
        }

        TicketCommands::Show { ticket_id } => {
            let ticket = store
                .fetch(ticket_id)
                .await?
                .with_context(|| format!("ticket {} not found", ticket_id))?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
            Ok(())
        }

        TicketCommands::Respond {
            ticket_id,
            text,
            created_by,
        } => {
            let ticket = store
                .fetch(ticket_id)
                .await?
                .with_context(|| format!("ticket {} not found", ticket_id))?;

            let responder = created_by
                .or(ticket.assigned_to)
                .unwrap_or(ticket.created_by);

            store
                .update(
                    ticket_id,
                    TicketDelta {
                        status: Some(TicketStatus::Resolved),
                        response: Some(TicketResponse {
                            text,
                            created_by: responder,
                            created_at: chrono::Utc::now(),
                            satisfied: false,
                        }),
                        ..Default::default()
                    },
                )
                .await?;

            println!("ticket {} resolved", ticket_id);
            Ok(())
        }

        TicketCommands::Close { ticket_id } => {
            let ticket = store
                .fetch(ticket_id)
                .await?
                .with_context(|| format!("ticket {} not found", ticket_id))?;

            let mut response = ticket
                .response
                .context("ticket has no response to accept")?;
            response.satisfied = true;

            store
                .update(
                    ticket_id,
                    TicketDelta {
                        status: Some(TicketStatus::Closed),
                        response: Some(response),
                        ..Default::default()
                    },
                )
                .await?;

            println!("ticket {} closed", ticket_id);
            Ok(())
        }
    }
}

async fn execute_account(cmd: AccountCommands) -> Result<()> {
    let directory = FileDirectory::open().await?;

    match cmd {
        AccountCommands::Add { email, role, skills } => {
            let role: Role = role.parse().map_err(anyhow::Error::msg)?;
            let skills = skills
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            let account = Account::new(email, role, skills);
            directory.add(account.clone()).await?;

            println!("{}", serde_json::to_string_pretty(&account)?);
            Ok(())
        }

        AccountCommands::List => {
            for account in directory.list().await? {
                println!(
                    "{}  {:<9}  {:<30}  {}",
                    account.id,
                    account.role.to_string(),
                    account.email,
                    account.skills.join(",")
                );
            }
            Ok(())
        }
    }
}

async fn execute_triage(ticket_id: Uuid) -> Result<()> {
    let queue = TriageQueue::open_default().await?;
    let result = queue.enqueue(ticket_id).await?;
    info!(?result, "triage event enqueued");

    let store = Arc::new(FileTicketStore::open().await?);
    let directory = Arc::new(FileDirectory::open().await?);
    let pipeline = build_pipeline(store, directory)?;
    drain_until_empty(&pipeline, &queue).await
}

async fn execute_worker(once: bool) -> Result<()> {
    let queue = TriageQueue::open_default().await?;
    let poll_interval = config::config()?.retry.poll_interval_seconds;

    let store = Arc::new(FileTicketStore::open().await?);
    let directory = Arc::new(FileDirectory::open().await?);
    let pipeline = build_pipeline(store, directory)?;

    if once {
        return drain_until_empty(&pipeline, &queue).await;
    }

    info!(poll_interval, "worker started");
    loop {
        drain_until_empty(&pipeline, &queue).await?;
        tokio::time::sleep(std::time::Duration::from_secs(poll_interval)).await;
    }
}

/// Drain the queue until nothing is pending.
///
/// Terminates because every item's attempts are bounded by the retry
/// budget.
async fn drain_until_empty(pipeline: &TriagePipeline, queue: &TriageQueue) -> Result<()> {
    let max_retries = config::config()?.retry.max_retries;

    loop {
        let pending = queue.pending().await?;
        if pending.is_empty() {
            return Ok(());
        }

        for item in pending {
            deliver(pipeline, queue, &item, max_retries).await?;
        }
    }
}

/// Deliver one queue item to the pipeline and apply the retry budget
async fn deliver(
    pipeline: &TriagePipeline,
    queue: &TriageQueue,
    item: &QueueItem,
    max_retries: u32,
) -> Result<()> {
    queue.mark_delivering(&item.id).await?;

    let ticket_id = item.event.ticket_id;
    match pipeline.run(item.event.run_id, ticket_id).await {
        RunDisposition::Finished(outcome) => {
            queue.complete(&item.id).await?;

            if outcome.success {
                info!(
                    %ticket_id,
                    assigned_to = outcome.assigned_to.as_deref().unwrap_or("<unknown>"),
                    "triage completed"
                );
            } else {
                warn!(
                    %ticket_id,
                    reason = outcome.reason.as_deref().unwrap_or("<unknown>"),
                    "triage failed"
                );
            }
        }

        RunDisposition::Retry { error } => {
            queue.fail(&item.id, &error).await?;

            if item.retry_count < max_retries {
                queue.reset_for_retry(&item.id).await?;
                warn!(
                    %ticket_id,
                    %error,
                    attempt = item.retry_count + 1,
                    "triage attempt failed, requeued"
                );
            } else {
                queue.abandon(&item.id, &error).await?;
                let outcome = pipeline
                    .abandon(item.event.run_id, ticket_id, &error)
                    .await;
                error!(
                    %ticket_id,
                    reason = outcome.reason.as_deref().unwrap_or("<unknown>"),
                    "triage abandoned"
                );
            }
        }
    }

    Ok(())
}

async fn execute_status(run_id: Uuid) -> Result<()> {
    let run = RunLog::load(run_id)
        .await?
        .with_context(|| format!("run {} not found", run_id))?;

    print_run(&run);
    Ok(())
}

async fn execute_runs(limit: usize) -> Result<()> {
    let run_ids = RunLog::list_runs().await?;
    let mut runs = Vec::new();

    for run_id in run_ids {
        if let Ok(Some(run)) = RunLog::load(run_id).await {
            runs.push(run);
        }
    }

    // Most recent first
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    for run in runs.into_iter().take(limit) {
        println!(
            "{}  ticket={}  attempts={}  {:?}",
            run.id, run.ticket_id, run.attempts, run.state
        );
    }

    Ok(())
}

fn print_run(run: &Run) {
    println!("run:       {}", run.id);
    println!("ticket:    {}", run.ticket_id);
    println!("state:     {:?}", run.state);
    println!("attempts:  {}", run.attempts);
    println!("started:   {}", run.started_at);
    if let Some(completed_at) = run.completed_at {
        println!("completed: {}", completed_at);
    }

    if !run.step_statuses.is_empty() {
        println!("steps:");
        for step in [
            crate::core::pipeline::STEP_FETCH,
            crate::core::pipeline::STEP_CLASSIFY,
            crate::core::pipeline::STEP_ASSIGN,
            crate::core::pipeline::STEP_NOTIFY,
        ] {
            if let Some(status) = run.step_statuses.get(step) {
                println!("  {:<16} {:?}", step, status);
            }
        }
    }
}
