//! The subcommands for the `rfd` application.

use clap::Subcommand;

mod new;
pub use new::NewArgs;

mod serve;
pub use serve::ServeArgs;

#[derive(Debug, Clone, Eq, PartialEq, Subcommand)]
pub enum Subcommands {
    /// Run the RFD service: next-number allocation, branch creation and the GitHub repository handshake.
    #[clap(alias = "s")]
    Serve(ServeArgs),
    /// Create a new RFD branch through a running service.
    #[clap(alias = "n")]
    New(NewArgs),
}

impl Subcommands {
    /// Run the subcommand.
    pub async fn run(self) -> anyhow::Result<()> {
        match self {
            Self::Serve(args) => args.run().await,
            Self::New(args) => args.run().await,
        }
    }
}
