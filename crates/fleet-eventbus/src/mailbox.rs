use fleet_types::InterTeamMessage;
use tokio::sync::broadcast;

/// An inter-team message as delivered into a recipient's mailbox, carrying
/// the sender identity the Router stamps on (`team:<from>`), distinct from
/// `InterTeamMessage::from_team` which is the raw team ID.
#[derive(Debug, Clone)]
pub struct MailboxMessage {
    pub sender: String,
    pub message: InterTeamMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    NoReceivers,
}

impl std::fmt::Display for MailboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxError::NoReceivers => write!(f, "mailbox has no active receivers"),
        }
    }
}

impl std::error::Error for MailboxError {}

/// Append-only broadcast channel per session/team. The Router is the sole
/// writer; a team's Hub subscribes to read.
#[derive(Clone)]
pub struct Mailbox {
    tx: broadcast::Sender<MailboxMessage>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MailboxMessage> {
        self.tx.subscribe()
    }

    pub fn send(&self, sender: impl Into<String>, message: InterTeamMessage) -> Result<(), MailboxError> {
        self.tx
            .send(MailboxMessage {
                sender: sender.into(),
                message,
            })
            .map(|_| ())
            .map_err(|_| MailboxError::NoReceivers)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
