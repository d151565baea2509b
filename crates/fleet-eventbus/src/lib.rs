//! In-process pub/sub (`EventBus`) and per-team broadcast mailboxes
//! (`Mailbox`) shared by every component in a session.

mod bus;
mod event;
mod mailbox;
pub mod topics;

pub use bus::EventBus;
pub use event::Event;
pub use mailbox::{Mailbox, MailboxError, MailboxMessage};
