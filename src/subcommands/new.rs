//! `new` subcommand.

use crate::{
    client::{RfdClient, SessionCookie},
    constants::SESSION_COOKIE,
    flow::{
        driver::{FlowDriver, FlowOutcome, FlowPrompt, UserIntent},
        FlowState,
    },
    number::RfdNumber,
};
use anyhow::{anyhow, Result};
use clap::Args;
use inquire::{Confirm, CustomType, InquireError, Password, PasswordDisplayMode, Select};
use nu_ansi_term::Color::{Blue, Green, Red, Yellow};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

const RETRY: &str = "Retry";
const CLOSE: &str = "Close";

/// CLI arguments for the `new` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct NewArgs {
    /// URL of the RFD service.
    #[arg(long, env = "RFD_SERVER", default_value = "http://localhost:3000")]
    server: Url,
    /// Value of the `rfd_session` cookie of a signed-in browser session. Prompted for when
    /// omitted.
    #[arg(long, env = "RFD_SESSION_COOKIE", hide_env_values = true)]
    cookie: Option<String>,
    /// Request timeout, in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl NewArgs {
    /// Run the `new` subcommand.
    pub async fn run(self) -> Result<()> {
        let cookie = match self.cookie.filter(|c| !c.is_empty()) {
            Some(cookie) => cookie,
            None => Password::new(&format!("Value of your `{SESSION_COOKIE}` cookie:"))
                .without_confirmation()
                .with_display_mode(PasswordDisplayMode::Masked)
                .prompt()?,
        };
        let cookie = SessionCookie::new(cookie);
        let client = RfdClient::new(
            self.server.clone(),
            cookie.clone(),
            Duration::from_secs(self.timeout),
        )?;

        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        let mut prompt = TerminalPrompt {
            server: self.server,
            cookie,
        };
        match FlowDriver::new(&client, &mut prompt).run(cancel).await? {
            FlowOutcome::Created {
                branch_name,
                branch_url,
            } => {
                println!("Branch `{}` is ready: {}", Blue.paint(branch_name), branch_url);
                Ok(())
            }
            FlowOutcome::SignInRequired => Err(anyhow!(
                "Your session has expired. Sign in again and pass the new `{SESSION_COOKIE}` cookie."
            )),
            FlowOutcome::Dismissed => Ok(()),
        }
    }
}

/// Renders the flow on the terminal and collects decisions with `inquire`.
struct TerminalPrompt {
    server: Url,
    cookie: SessionCookie,
}

impl TerminalPrompt {
    /// Asks for the number to create, defaulting to `offered`.
    fn ask_number(&self, offered: RfdNumber) -> Result<Option<RfdNumber>> {
        let answer = CustomType::<RfdNumber>::new("RFD number:")
            .with_default(offered)
            .with_help_message("a positive number, e.g. 42 or 0042")
            .with_error_message("Please type a positive RFD number")
            .prompt();
        dismissed_on_cancel(answer)
    }

    fn decide_confirming(&self, offered: RfdNumber) -> Result<UserIntent> {
        let Some(number) = self.ask_number(offered)? else {
            return Ok(UserIntent::Dismiss);
        };
        let question = format!(
            "Create branch {} and open it on GitHub?",
            Blue.paint(number.branch_name())
        );
        let answer = Confirm::new(&question).with_default(true).prompt();
        Ok(match dismissed_on_cancel(answer)? {
            Some(true) => UserIntent::Confirm(number),
            _ => UserIntent::Dismiss,
        })
    }

    fn decide_connecting(&self) -> Result<UserIntent> {
        let answer = Password::new(&format!(
            "Refreshed `{SESSION_COOKIE}` cookie (leave empty to cancel):"
        ))
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt();
        match dismissed_on_cancel(answer)? {
            Some(value) if !value.trim().is_empty() => {
                self.cookie.set(value.trim());
                Ok(UserIntent::HandshakeCompleted)
            }
            _ => Ok(UserIntent::Dismiss),
        }
    }
}

impl FlowPrompt for TerminalPrompt {
    fn show(&mut self, state: &FlowState) {
        match state {
            FlowState::Idle => {}
            FlowState::Loading => println!("Getting next available RFD number..."),
            FlowState::Confirming { adjusted_from, .. } => {
                println!(
                    "Next available RFD number: {}",
                    Blue.paint(state.formatted_number().unwrap_or_default())
                );
                if let Some(adjusted_from) = adjusted_from {
                    println!(
                        "{}",
                        Yellow.paint(format!(
                            "Note: RFD {adjusted_from} already has a branch. Adjusted to the next available number."
                        ))
                    );
                }
            }
            FlowState::ConnectingGitHub {
                number,
                is_reconnect,
            } => {
                if *is_reconnect {
                    println!(
                        "{}",
                        Yellow.paint(
                            "Your GitHub connection has expired or been revoked. Please reconnect to continue."
                        )
                    );
                }
                let verb = if *is_reconnect { "reconnect" } else { "connect" };
                println!(
                    "To create branch {}, you need to {verb} your GitHub account with repository access.",
                    Blue.paint(number.branch_name())
                );
                println!(
                    "Open {} in your browser, choose \"Connect GitHub\", then paste the refreshed `{SESSION_COOKIE}` cookie here.",
                    Blue.paint(self.server.as_str())
                );
            }
            FlowState::Creating { number } => {
                println!("Creating branch {}...", Blue.paint(number.branch_name()))
            }
            FlowState::Done {
                branch_name,
                branch_url,
            } => {
                println!(
                    "{} Branch {} created successfully!",
                    Green.paint("✓"),
                    Blue.paint(branch_name)
                );
                println!("View the branch on GitHub: {branch_url}");
            }
            FlowState::Error { message, .. } => println!("{}", Red.paint(message)),
        }
    }

    fn decide(&mut self, state: &FlowState) -> Result<UserIntent> {
        match state {
            FlowState::Confirming { number, .. } => self.decide_confirming(*number),
            FlowState::ConnectingGitHub { .. } => self.decide_connecting(),
            FlowState::Error {
                can_retry: true, ..
            } => {
                let answer = Select::new("What next?", vec![RETRY, CLOSE]).prompt();
                Ok(match dismissed_on_cancel(answer)? {
                    Some(RETRY) => UserIntent::Retry,
                    _ => UserIntent::Dismiss,
                })
            }
            FlowState::Error { .. }
            | FlowState::Done { .. }
            | FlowState::Idle
            | FlowState::Loading
            | FlowState::Creating { .. } => Ok(UserIntent::Dismiss),
        }
    }

    fn navigate(&mut self, location: &str) {
        let target = self
            .server
            .join(location)
            .map_or_else(|_| location.to_string(), String::from);
        println!(
            "{}",
            Red.paint(format!("Your session has expired. Sign in again at {target}"))
        );
    }

    fn open_editor(&mut self, url: &str) {
        println!("Write the RFD in the GitHub editor:\n  {}", Blue.paint(url));
    }
}

/// Treats an aborted prompt as the user closing the dialog.
fn dismissed_on_cancel<T>(answer: Result<T, InquireError>) -> Result<Option<T>> {
    match answer {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
