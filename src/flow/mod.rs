//! The client-side state machine behind "create a new RFD".
//!
//! [FlowController] is pure and synchronous: it holds the current [FlowState] and moves it
//! forward in response to user actions and network responses, handing back [Effect]s for
//! the caller to carry out. The [driver] module runs it against a live API.

use crate::{
    constants::{FLOW_RESET_DELAY_MS, SIGN_IN_EXPIRED_PATH},
    github::branch::{editor_url, rfd_template},
    number::RfdNumber,
    wire::{CreatedBranch, ErrorBody, ErrorCode, NextNumber, RepoStatus},
};
use std::time::Duration;
use tracing::debug;

pub mod driver;

const NEXT_NUMBER_FAILED: &str = "Failed to get next RFD number";
const SERVER_UNREACHABLE: &str = "Failed to connect to server";
const CREATE_FAILED: &str = "Failed to create branch";

/// The state of the dialog. Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    /// Waiting on the next number.
    Loading,
    /// Offering `number` for confirmation. `adjusted_from` is the candidate the service
    /// moved past because its branch already existed.
    Confirming {
        number: RfdNumber,
        adjusted_from: Option<RfdNumber>,
    },
    /// Waiting on the user to grant repository access in the browser.
    ConnectingGitHub {
        number: RfdNumber,
        is_reconnect: bool,
    },
    /// Waiting on branch creation.
    Creating { number: RfdNumber },
    Done {
        branch_name: String,
        branch_url: String,
    },
    Error { message: String, can_retry: bool },
}

impl FlowState {
    /// Returns the zero-padded number the state is about, if any.
    pub fn formatted_number(&self) -> Option<String> {
        match self {
            Self::Confirming { number, .. }
            | Self::ConnectingGitHub { number, .. }
            | Self::Creating { number } => Some(number.formatted()),
            Self::Idle | Self::Loading | Self::Done { .. } | Self::Error { .. } => None,
        }
    }
}

/// Identifies the request a response belongs to. Responses carrying a ticket older than the
/// controller's current one are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Armed when the flow parks in [FlowState::ConnectingGitHub]; taken exactly once when the
/// handshake reports back.
#[derive(Debug)]
struct ResumeMarker;

/// Side effects requested by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The primary session is gone. Navigate to the given sign-in location.
    NavigateToSignIn(String),
    /// Open the pre-filled editor for the new RFD.
    OpenEditor(String),
    /// Call [FlowController::reset] with `ticket` once `delay` has passed.
    ResetAfter { delay: Duration, ticket: Ticket },
}

/// A failed API call, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFailure {
    /// The service answered with a non-2xx status.
    Status { status: u16, body: ErrorBody },
    /// The service could not be reached, or its answer could not be read.
    Network(String),
}

impl ApiFailure {
    /// Returns whether the primary session was rejected.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }

    fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Status { body, .. } => body.code,
            Self::Network(_) => None,
        }
    }

    /// The service's message, or `fallback` when there is none to show.
    fn message_or(&self, fallback: &str) -> String {
        match self {
            Self::Status { body, .. } if !body.error.is_empty() => body.error.clone(),
            _ => fallback.to_string(),
        }
    }
}

/// Drives [FlowState] through the creation of a new RFD branch.
#[derive(Debug)]
pub struct FlowController {
    state: FlowState,
    epoch: u64,
    resume: Option<ResumeMarker>,
    connected: bool,
    repository_url: String,
    author: Option<String>,
    reset_delay: Duration,
}

impl FlowController {
    /// Creates a new, idle [FlowController].
    pub fn new(status: &RepoStatus) -> Self {
        Self {
            state: FlowState::Idle,
            epoch: 0,
            resume: None,
            connected: status.connected,
            repository_url: status.repository_url.clone(),
            author: status.display_name.clone(),
            reset_delay: Duration::from_millis(FLOW_RESET_DELAY_MS),
        }
    }

    /// Overrides the grace delay between dismissal and reset.
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Refreshes what the controller knows about the repository connection.
    pub fn set_repo_status(&mut self, status: &RepoStatus) {
        self.connected = status.connected;
        self.repository_url = status.repository_url.clone();
        self.author = status.display_name.clone();
    }

    /// Starts (or retries) the flow by requesting the next number.
    ///
    /// ## Returns
    /// - `Some(Ticket)` - The ticket for the next-number request to send.
    /// - `None` - The flow is busy or finished.
    pub fn begin(&mut self) -> Option<Ticket> {
        match self.state {
            FlowState::Idle | FlowState::Error { can_retry: true, .. } => {
                self.state = FlowState::Loading;
                Some(self.next_ticket())
            }
            _ => None,
        }
    }

    /// Applies the outcome of the next-number request sent with `ticket`.
    pub fn on_next_number(
        &mut self,
        ticket: Ticket,
        result: Result<NextNumber, ApiFailure>,
    ) -> Option<Effect> {
        if !self.accepts(ticket, |state| matches!(state, FlowState::Loading)) {
            return None;
        }

        match result {
            Ok(next) => {
                self.state = FlowState::Confirming {
                    number: next.next_number,
                    adjusted_from: next.adjusted_from,
                };
                None
            }
            Err(failure) if failure.is_unauthorized() => Some(sign_in()),
            Err(failure @ ApiFailure::Status { .. }) => {
                self.state = FlowState::Error {
                    message: failure.message_or(NEXT_NUMBER_FAILED),
                    can_retry: true,
                };
                None
            }
            Err(ApiFailure::Network(_)) => {
                self.state = FlowState::Error {
                    message: SERVER_UNREACHABLE.to_string(),
                    can_retry: true,
                };
                None
            }
        }
    }

    /// Replaces the offered number with one the user typed. Only valid while confirming;
    /// no request is made.
    pub fn edit_number(&mut self, number: RfdNumber) -> bool {
        match &mut self.state {
            FlowState::Confirming {
                number: current,
                adjusted_from,
            } => {
                if *current != number {
                    *current = number;
                    *adjusted_from = None;
                }
                true
            }
            _ => false,
        }
    }

    /// Confirms the offered number.
    ///
    /// ## Returns
    /// - `Some((Ticket, RfdNumber))` - Send the create-branch request for the number.
    /// - `None` - Nothing to send: either the flow is not confirming, or there is no
    ///   repository credential and the flow now waits in [FlowState::ConnectingGitHub].
    pub fn confirm(&mut self) -> Option<(Ticket, RfdNumber)> {
        let FlowState::Confirming { number, .. } = self.state else {
            return None;
        };

        if !self.connected {
            self.park(number, false);
            return None;
        }
        self.state = FlowState::Creating { number };
        Some((self.next_ticket(), number))
    }

    /// Applies the outcome of the create-branch request sent with `ticket`.
    pub fn on_branch_created(
        &mut self,
        ticket: Ticket,
        result: Result<CreatedBranch, ApiFailure>,
    ) -> Option<Effect> {
        if !self.accepts(ticket, |state| matches!(state, FlowState::Creating { .. })) {
            return None;
        }
        let FlowState::Creating { number } = self.state else {
            return None;
        };

        match result {
            Ok(created) => {
                let template = rfd_template(self.author.as_deref());
                let editor = editor_url(
                    &self.repository_url,
                    &created.branch_name,
                    created.rfd_number,
                    &template,
                );
                self.state = FlowState::Done {
                    branch_url: format!("{}/tree/{}", self.repository_url, created.branch_name),
                    branch_name: created.branch_name,
                };
                Some(Effect::OpenEditor(editor))
            }
            Err(failure) if failure.is_unauthorized() => Some(sign_in()),
            Err(failure) => {
                match failure.code() {
                    Some(code @ (ErrorCode::GithubAuthRequired | ErrorCode::AuthError)) => {
                        self.connected = false;
                        self.park(number, code == ErrorCode::AuthError);
                    }
                    code => {
                        self.state = FlowState::Error {
                            message: failure.message_or(CREATE_FAILED),
                            can_retry: code != Some(ErrorCode::BranchExists),
                        };
                    }
                }
                None
            }
        }
    }

    /// Resumes the flow once the handshake has completed, starting over from the
    /// next-number request. Only the first call after parking does anything.
    pub fn resume_after_handshake(&mut self) -> Option<Ticket> {
        if !matches!(self.state, FlowState::ConnectingGitHub { .. }) {
            return None;
        }
        self.resume.take()?;
        self.state = FlowState::Loading;
        Some(self.next_ticket())
    }

    /// Closes the dialog. Responses to requests already in flight are discarded from now on.
    pub fn dismiss(&mut self) -> Effect {
        self.resume = None;
        Effect::ResetAfter {
            delay: self.reset_delay,
            ticket: self.next_ticket(),
        }
    }

    /// Returns to [FlowState::Idle], unless something happened since the dismissal that
    /// handed out `ticket`.
    pub fn reset(&mut self, ticket: Ticket) {
        if ticket == Ticket(self.epoch) {
            self.state = FlowState::Idle;
        }
    }

    fn next_ticket(&mut self) -> Ticket {
        self.epoch += 1;
        Ticket(self.epoch)
    }

    fn accepts(&self, ticket: Ticket, expected: impl Fn(&FlowState) -> bool) -> bool {
        let current = ticket == Ticket(self.epoch) && expected(&self.state);
        if !current {
            debug!(?ticket, state = ?self.state, "discarding stale response");
        }
        current
    }

    fn park(&mut self, number: RfdNumber, is_reconnect: bool) {
        self.state = FlowState::ConnectingGitHub {
            number,
            is_reconnect,
        };
        self.resume = Some(ResumeMarker);
    }
}

fn sign_in() -> Effect {
    Effect::NavigateToSignIn(SIGN_IN_EXPIRED_PATH.to_string())
}

#[cfg(test)]
pub(crate) mod test {
    use super::{ApiFailure, Effect, FlowController, FlowState};
    use crate::{
        number::RfdNumber,
        wire::{CreatedBranch, ErrorBody, ErrorCode, NextNumber, RepoStatus},
    };
    use std::time::Duration;

    pub(crate) fn n(n: u32) -> RfdNumber {
        RfdNumber::new(n).unwrap()
    }

    pub(crate) fn status(connected: bool) -> RepoStatus {
        RepoStatus {
            local_mode: false,
            configured: true,
            connected,
            repository_url: "https://github.com/oxidecomputer/rfd".to_string(),
            display_name: Some("Ada Lovelace".to_string()),
        }
    }

    pub(crate) fn next(number: u32, adjusted_from: Option<u32>) -> NextNumber {
        NextNumber {
            next_number: n(number),
            formatted_number: n(number).formatted(),
            adjusted_from: adjusted_from.map(n),
        }
    }

    pub(crate) fn created(number: u32) -> CreatedBranch {
        CreatedBranch {
            success: true,
            branch_name: n(number).branch_name(),
            rfd_number: n(number),
            formatted_number: n(number).formatted(),
        }
    }

    pub(crate) fn failure(status: u16, error: &str, code: Option<ErrorCode>) -> ApiFailure {
        ApiFailure::Status {
            status,
            body: ErrorBody {
                error: error.to_string(),
                code,
            },
        }
    }

    /// A controller sitting in `Confirming(number)`.
    fn confirming(connected: bool, number: u32) -> FlowController {
        let mut flow = FlowController::new(&status(connected));
        let ticket = flow.begin().unwrap();
        assert_eq!(flow.on_next_number(ticket, Ok(next(number, None))), None);
        flow
    }

    #[test]
    fn offers_the_next_number() {
        let mut flow = FlowController::new(&status(true));
        assert_eq!(flow.state(), &FlowState::Idle);
        let ticket = flow.begin().unwrap();
        assert_eq!(flow.state(), &FlowState::Loading);
        assert_eq!(flow.begin(), None);

        flow.on_next_number(ticket, Ok(next(14, Some(12))));
        assert_eq!(
            flow.state(),
            &FlowState::Confirming {
                number: n(14),
                adjusted_from: Some(n(12))
            }
        );
        assert_eq!(flow.state().formatted_number().as_deref(), Some("0014"));
    }

    #[test]
    fn editing_drops_the_adjustment_note() {
        let mut flow = FlowController::new(&status(true));
        let ticket = flow.begin().unwrap();
        flow.on_next_number(ticket, Ok(next(14, Some(12))));

        assert!(flow.edit_number(n(14)));
        assert!(matches!(
            flow.state(),
            FlowState::Confirming { adjusted_from: Some(_), .. }
        ));
        assert!(flow.edit_number(n(20)));
        assert_eq!(
            flow.state(),
            &FlowState::Confirming {
                number: n(20),
                adjusted_from: None
            }
        );
    }

    #[test]
    fn confirm_without_credential_parks_for_the_handshake() {
        let mut flow = confirming(false, 42);
        assert_eq!(flow.confirm(), None);
        assert_eq!(
            flow.state(),
            &FlowState::ConnectingGitHub {
                number: n(42),
                is_reconnect: false
            }
        );
    }

    #[test]
    fn creates_and_opens_the_editor() {
        let mut flow = confirming(true, 42);
        let (ticket, number) = flow.confirm().unwrap();
        assert_eq!(number, n(42));
        assert_eq!(flow.state(), &FlowState::Creating { number: n(42) });

        let effect = flow.on_branch_created(ticket, Ok(created(42))).unwrap();
        let Effect::OpenEditor(url) = effect else {
            panic!("unexpected effect {effect:?}");
        };
        assert!(url.starts_with("https://github.com/oxidecomputer/rfd/new/rfd-0042?"));
        assert!(url.contains("Ada+Lovelace"));
        assert_eq!(
            flow.state(),
            &FlowState::Done {
                branch_name: "rfd-0042".to_string(),
                branch_url: "https://github.com/oxidecomputer/rfd/tree/rfd-0042".to_string(),
            }
        );
    }

    #[test]
    fn existing_branch_is_not_retryable() {
        let mut flow = confirming(true, 42);
        let (ticket, _) = flow.confirm().unwrap();
        flow.on_branch_created(
            ticket,
            Err(failure(
                409,
                "Branch \"rfd-0042\" already exists",
                Some(ErrorCode::BranchExists),
            )),
        );
        assert_eq!(
            flow.state(),
            &FlowState::Error {
                message: "Branch \"rfd-0042\" already exists".to_string(),
                can_retry: false
            }
        );
        assert_eq!(flow.begin(), None);
    }

    #[test]
    fn rejected_credential_asks_for_reconnection() {
        let mut flow = confirming(true, 42);
        let (ticket, _) = flow.confirm().unwrap();
        flow.on_branch_created(
            ticket,
            Err(failure(500, "GitHub authentication failed.", Some(ErrorCode::AuthError))),
        );
        assert_eq!(
            flow.state(),
            &FlowState::ConnectingGitHub {
                number: n(42),
                is_reconnect: true
            }
        );

        let mut flow = confirming(true, 42);
        let (ticket, _) = flow.confirm().unwrap();
        flow.on_branch_created(
            ticket,
            Err(failure(403, "", Some(ErrorCode::GithubAuthRequired))),
        );
        assert_eq!(
            flow.state(),
            &FlowState::ConnectingGitHub {
                number: n(42),
                is_reconnect: false
            }
        );
    }

    #[test]
    fn expired_session_navigates_to_sign_in() {
        let expired = || failure(401, "Session expired", Some(ErrorCode::SessionExpired));
        let sign_in = Some(Effect::NavigateToSignIn("/login?expired=true".to_string()));

        let mut flow = FlowController::new(&status(true));
        let ticket = flow.begin().unwrap();
        assert_eq!(flow.on_next_number(ticket, Err(expired())), sign_in);

        let mut flow = confirming(true, 42);
        let (ticket, _) = flow.confirm().unwrap();
        assert_eq!(flow.on_branch_created(ticket, Err(expired())), sign_in);

        // A rejected repository credential on next-number is a 401 too.
        let mut flow = FlowController::new(&status(true));
        let ticket = flow.begin().unwrap();
        assert_eq!(
            flow.on_next_number(
                ticket,
                Err(failure(401, "GitHub authentication expired.", Some(ErrorCode::AuthError)))
            ),
            sign_in
        );
    }

    #[test]
    fn failures_fall_back_to_default_messages() {
        let mut flow = FlowController::new(&status(true));
        let ticket = flow.begin().unwrap();
        flow.on_next_number(ticket, Err(failure(500, "", None)));
        assert_eq!(
            flow.state(),
            &FlowState::Error {
                message: "Failed to get next RFD number".to_string(),
                can_retry: true
            }
        );

        let ticket = flow.begin().unwrap();
        flow.on_next_number(ticket, Err(ApiFailure::Network("refused".to_string())));
        assert_eq!(
            flow.state(),
            &FlowState::Error {
                message: "Failed to connect to server".to_string(),
                can_retry: true
            }
        );

        let mut flow = confirming(true, 42);
        let (ticket, _) = flow.confirm().unwrap();
        flow.on_branch_created(ticket, Err(ApiFailure::Network("reset".to_string())));
        assert_eq!(
            flow.state(),
            &FlowState::Error {
                message: "Failed to create branch".to_string(),
                can_retry: true
            }
        );
    }

    #[test]
    fn dismissal_discards_late_responses() {
        let mut flow = FlowController::new(&status(true));
        let ticket = flow.begin().unwrap();
        let Effect::ResetAfter { delay, ticket: reset } = flow.dismiss() else {
            panic!("dismiss must schedule a reset");
        };
        assert_eq!(delay, Duration::from_millis(200));

        assert_eq!(flow.on_next_number(ticket, Ok(next(12, None))), None);
        assert_eq!(flow.state(), &FlowState::Loading);
        flow.reset(reset);
        assert_eq!(flow.state(), &FlowState::Idle);
    }

    #[test]
    fn reset_is_skipped_when_reopened() {
        let mut flow = FlowController::new(&status(true));
        flow.begin();
        let Effect::ResetAfter { ticket: reset, .. } = flow.dismiss() else {
            unreachable!()
        };
        flow.reset(reset);

        // Reopened before a second reset fired.
        let Effect::ResetAfter { ticket: stale, .. } = flow.dismiss() else {
            unreachable!()
        };
        let ticket = flow.begin().unwrap();
        flow.reset(stale);
        assert_eq!(flow.state(), &FlowState::Loading);
        flow.on_next_number(ticket, Ok(next(3, None)));
        assert!(matches!(flow.state(), FlowState::Confirming { .. }));
    }

    #[test]
    fn handshake_resumes_once() {
        let mut flow = confirming(false, 42);
        flow.confirm();
        flow.set_repo_status(&status(true));

        let ticket = flow.resume_after_handshake().unwrap();
        assert_eq!(flow.state(), &FlowState::Loading);
        assert_eq!(flow.resume_after_handshake(), None);

        flow.on_next_number(ticket, Ok(next(42, None)));
        assert!(flow.confirm().is_some());
    }

    #[test]
    fn dismissal_disarms_the_resume() {
        let mut flow = confirming(false, 42);
        flow.confirm();
        flow.dismiss();
        assert_eq!(flow.resume_after_handshake(), None);
    }
}
