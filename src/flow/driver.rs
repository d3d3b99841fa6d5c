//! Runs a [FlowController] against a live API and an interactive prompt.

use super::{ApiFailure, Effect, FlowController, FlowState, Ticket};
use crate::{
    constants::SIGN_IN_EXPIRED_PATH,
    number::RfdNumber,
    wire::{CreatedBranch, NextNumber, RepoStatus},
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The service endpoints the flow talks to.
#[async_trait]
pub trait FlowApi: Send + Sync {
    async fn repo_status(&self) -> Result<RepoStatus, ApiFailure>;
    async fn next_number(&self) -> Result<NextNumber, ApiFailure>;
    async fn create_branch(&self, number: RfdNumber) -> Result<CreatedBranch, ApiFailure>;
}

/// What the user chose to do in an interactive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserIntent {
    /// Create the branch for this number, which may differ from the one offered.
    Confirm(RfdNumber),
    Retry,
    /// The repository handshake finished in the browser.
    HandshakeCompleted,
    Dismiss,
}

/// The user-facing half of the flow.
pub trait FlowPrompt {
    /// Renders `state`. Called on every state the flow passes through.
    fn show(&mut self, state: &FlowState);

    /// Asks the user what to do next in an interactive state.
    fn decide(&mut self, state: &FlowState) -> Result<UserIntent>;

    /// Sends the user to `location` to sign in again.
    fn navigate(&mut self, location: &str);

    /// Opens the editor for the new RFD.
    fn open_editor(&mut self, url: &str);
}

/// How a flow run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Created {
        branch_name: String,
        branch_url: String,
    },
    SignInRequired,
    Dismissed,
}

/// A request the controller has asked for.
enum Pending {
    NextNumber(Ticket),
    CreateBranch(Ticket, RfdNumber),
}

/// Runs one "create a new RFD" dialog to completion.
pub struct FlowDriver<'a, A, P> {
    api: &'a A,
    prompt: &'a mut P,
    reset_delay: Option<Duration>,
}

impl<'a, A, P> FlowDriver<'a, A, P>
where
    A: FlowApi,
    P: FlowPrompt,
{
    /// Creates a new [FlowDriver].
    pub fn new(api: &'a A, prompt: &'a mut P) -> Self {
        Self {
            api,
            prompt,
            reset_delay: None,
        }
    }

    /// Overrides the controller's grace delay after dismissal.
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = Some(delay);
        self
    }

    /// Runs the flow until the user closes it, the session expires, or `cancel` fires.
    ///
    /// ## Takes
    /// - `cancel` - Dismisses the flow, abandoning any request in flight.
    ///
    /// ## Returns
    /// - `Result<FlowOutcome>` - How the flow ended. Errors only when the flow cannot start,
    ///   or the prompt fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<FlowOutcome> {
        let status = match self.api.repo_status().await {
            Ok(status) => status,
            Err(failure) if failure.is_unauthorized() => {
                self.prompt.navigate(SIGN_IN_EXPIRED_PATH);
                return Ok(FlowOutcome::SignInRequired);
            }
            Err(failure) => bail!("failed to read repository status: {failure:?}"),
        };
        if status.local_mode {
            bail!("Creating RFDs is not available in local mode");
        }

        let mut controller = FlowController::new(&status);
        if let Some(delay) = self.reset_delay {
            controller = controller.with_reset_delay(delay);
        }

        let mut pending = controller.begin().map(Pending::NextNumber);
        loop {
            if let Some(request) = pending.take() {
                self.prompt.show(controller.state());
                let answered = tokio::select! {
                    _ = cancel.cancelled() => None,
                    effect = self.send(&mut controller, request) => Some(effect),
                };
                let Some(effect) = answered else {
                    info!("flow cancelled with a request in flight");
                    return Ok(close(&mut controller).await);
                };
                match effect {
                    Some(Effect::NavigateToSignIn(location)) => {
                        self.prompt.navigate(&location);
                        return Ok(FlowOutcome::SignInRequired);
                    }
                    Some(Effect::OpenEditor(url)) => self.prompt.open_editor(&url),
                    Some(Effect::ResetAfter { .. }) | None => {}
                }
            }

            let state = controller.state().clone();
            self.prompt.show(&state);
            if cancel.is_cancelled() {
                return Ok(close(&mut controller).await);
            }

            pending = match self.prompt.decide(&state)? {
                UserIntent::Confirm(number) => {
                    controller.edit_number(number);
                    controller
                        .confirm()
                        .map(|(ticket, number)| Pending::CreateBranch(ticket, number))
                }
                UserIntent::Retry => controller.begin().map(Pending::NextNumber),
                UserIntent::HandshakeCompleted => {
                    match self.api.repo_status().await {
                        Ok(status) => controller.set_repo_status(&status),
                        Err(failure) if failure.is_unauthorized() => {
                            self.prompt.navigate(SIGN_IN_EXPIRED_PATH);
                            return Ok(FlowOutcome::SignInRequired);
                        }
                        Err(failure) => warn!(?failure, "failed to refresh repository status"),
                    }
                    controller.resume_after_handshake().map(Pending::NextNumber)
                }
                UserIntent::Dismiss => return Ok(close(&mut controller).await),
            };
        }
    }

    async fn send(&self, controller: &mut FlowController, request: Pending) -> Option<Effect> {
        match request {
            Pending::NextNumber(ticket) => {
                let result = self.api.next_number().await;
                controller.on_next_number(ticket, result)
            }
            Pending::CreateBranch(ticket, number) => {
                let result = self.api.create_branch(number).await;
                controller.on_branch_created(ticket, result)
            }
        }
    }
}

/// Dismisses the flow, waits out the grace delay and resets it.
async fn close(controller: &mut FlowController) -> FlowOutcome {
    let outcome = match controller.state() {
        FlowState::Done {
            branch_name,
            branch_url,
        } => FlowOutcome::Created {
            branch_name: branch_name.clone(),
            branch_url: branch_url.clone(),
        },
        _ => FlowOutcome::Dismissed,
    };

    if let Effect::ResetAfter { delay, ticket } = controller.dismiss() {
        tokio::time::sleep(delay).await;
        controller.reset(ticket);
    }
    outcome
}
