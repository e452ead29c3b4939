//! Intake orchestration.
//!
//! `submit` is the clarification loop in front of `CreateJob`; `deploy`
//! is the follow-on that pushes a completed build to the edge, echoing the
//! job's fencing token so the serving runner can enforce activation
//! monotonicity.

use std::sync::Arc;

use pagewright_core::error::{Error, Result};
use pagewright_core::id::JobId;
use pagewright_core::job::{Job, JobRequest, JobStatus};

use crate::clarify::{Classification, ConversationMap, PromptClassifier};
use crate::clients::{ManagerApi, ServingApi};

/// What a build submission produced.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A job was created.
    Job(Box<Job>),
    /// The user owes an answer first.
    Question {
        /// Handle for the follow-up message.
        conversation_id: String,
        /// The clarifying question.
        question: String,
    },
}

/// A build submission from the user-facing API.
#[derive(Debug)]
pub struct Submission {
    /// The site to mutate.
    pub site_id: String,
    /// The user's message.
    pub prompt: String,
    /// Present on a follow-up to a clarification question.
    pub conversation_id: Option<String>,
    /// The site's current live version, if any.
    pub source_version: Option<String>,
}

/// Orchestrates clarification, job creation, and deploys.
pub struct IntakeService {
    classifier: Arc<dyn PromptClassifier>,
    conversations: Arc<ConversationMap>,
    manager: ManagerApi,
    serving: ServingApi,
}

impl IntakeService {
    /// Creates the intake service.
    #[must_use]
    pub fn new(
        classifier: Arc<dyn PromptClassifier>,
        conversations: Arc<ConversationMap>,
        manager: ManagerApi,
        serving: ServingApi,
    ) -> Self {
        Self {
            classifier,
            conversations,
            manager,
            serving,
        }
    }

    /// Handles one build submission.
    ///
    /// # Errors
    ///
    /// - `NotFound` when a follow-up references an expired conversation
    /// - `Conflict` when the site already has a job in flight
    /// - `Unavailable` when the manager or classifier is unreachable
    pub async fn submit(&self, submission: Submission) -> Result<SubmitOutcome> {
        if let Some(conversation_id) = &submission.conversation_id {
            let Some(pending) = self.conversations.take(conversation_id) else {
                return Err(Error::NotFound(format!(
                    "conversation not found or expired: {conversation_id}"
                )));
            };
            if pending.site_id != submission.site_id {
                return Err(Error::InvalidInput(
                    "conversation belongs to a different site".to_string(),
                ));
            }
            let merged = format!("{}\n\n{}", pending.original_prompt, submission.prompt);
            return self.create_job(&submission, merged).await;
        }

        match self.classifier.classify(&submission.prompt).await? {
            Classification::Clear { instructions } => {
                self.create_job(&submission, instructions).await
            }
            Classification::NeedsClarification { question } => {
                let conversation_id = self
                    .conversations
                    .insert(&submission.site_id, &submission.prompt);
                tracing::info!(
                    site_id = %submission.site_id,
                    conversation_id = %conversation_id,
                    "prompt needs clarification"
                );
                Ok(SubmitOutcome::Question {
                    conversation_id,
                    question,
                })
            }
        }
    }

    async fn create_job(&self, submission: &Submission, prompt: String) -> Result<SubmitOutcome> {
        let job = self
            .manager
            .create_job(&JobRequest {
                site_id: submission.site_id.clone(),
                prompt,
                source_version: submission.source_version.clone(),
                target_version: None,
            })
            .await?;
        Ok(SubmitOutcome::Job(Box::new(job)))
    }

    /// Fetches a job record from the manager.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or expired jobs.
    pub async fn job(&self, job_id: &JobId) -> Result<Job> {
        self.manager.get_job(job_id).await
    }

    /// Deploys a completed job's artifact and activates it.
    ///
    /// The fencing token is read from the job record, never from the
    /// caller, so stale workers cannot smuggle an old version live.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when the job is not completed
    /// - `PreconditionFailed` when a newer job already activated
    /// - `NotFound` when the artifact never reached the store
    pub async fn deploy_job(&self, fqdn: &str, job_id: &JobId, preview: bool) -> Result<()> {
        let job = self.manager.get_job(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(Error::InvalidInput(format!(
                "job {job_id} is {}; only completed jobs deploy",
                job.status
            )));
        }

        self.serving
            .deploy(fqdn, job.site_id.as_str(), job.target_version.as_str())
            .await?;
        self.serving
            .activate(
                fqdn,
                job.target_version.as_str(),
                preview,
                Some(job.fencing_token),
            )
            .await
    }

    /// Replaces a site's alias set on the edge.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the serving runner is unreachable.
    pub async fn update_aliases(&self, fqdn: &str, aliases: &[String]) -> Result<()> {
        self.serving.update_aliases(fqdn, aliases).await
    }
}
