use std::fmt::Debug;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::reminder::ReminderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    Created(ReminderId),
    Updated(ReminderId),
    Deleted(ReminderId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorEvent {
    /// A one-shot reminder fired and now waits out its grace period.
    Queued(ReminderId),
    Updated(ReminderId),
    Deleted(ReminderId),
}

/// Sending half of a loop's bounded mailbox. Posting never blocks: a full mailbox drops the
/// event, the loop re-reads storage on its next wake-up anyway.
pub struct Mailbox<E> {
    name: &'static str,
    sender: mpsc::Sender<E>,
}

impl<E> Clone for Mailbox<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            sender: self.sender.clone(),
        }
    }
}

impl<E: Debug> Mailbox<E> {
    pub fn new(name: &'static str, sender: mpsc::Sender<E>) -> Self {
        Self { name, sender }
    }

    pub fn post(&self, event: E) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => log::warn!(
                "Mailbox is full, dropping event. [mailbox = {}, event = {:?}]",
                self.name,
                event
            ),
            Err(TrySendError::Closed(event)) => log::debug!(
                "Mailbox is closed, dropping event. [mailbox = {}, event = {:?}]",
                self.name,
                event
            ),
        }
    }
}

pub fn mailbox<E: Debug>(name: &'static str, capacity: usize) -> (Mailbox<E>, mpsc::Receiver<E>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (Mailbox::new(name, sender), receiver)
}
