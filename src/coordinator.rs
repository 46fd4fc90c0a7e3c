use embassy_time::{Duration, Instant};
use heapless::{Deque, String};

use crate::command::{CommandKind, MAX_COMMAND_LEN};
use crate::error::Error;
use crate::transport::{append_line, trimmed, Response};

pub const QUEUE_CAPACITY: usize = 8;
pub const OUTCOME_CAPACITY: usize = 4;

pub type CommandId = u32;

#[derive(Debug, Clone)]
pub struct Command {
    pub id: CommandId,
    pub text: String<MAX_COMMAND_LEN>,
    pub kind: CommandKind,
    pub timeout: Duration,
}

/// The one command that has been written to the serial line and awaits completion.
#[derive(Debug)]
pub struct ActiveCommand {
    pub command: Command,
    pub started: Instant,
    pub response: Response,
}

/// Result of a retired queued command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Response(Response),
    /// No completion marker arrived in time.
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Response(r) => r.as_str(),
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Response(r) if r.contains("OK"))
    }
}

/// Exclusive use of the serial line by a long running location lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingState {
    active: Option<(CommandKind, Instant)>,
}

impl BlockingState {
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn kind(&self) -> Option<CommandKind> {
        self.active.map(|(kind, _)| kind)
    }

    /// Whether a command of `kind` has to be turned away right now.
    pub fn rejects(&self, kind: CommandKind) -> bool {
        matches!(self.active, Some((active, _)) if active != kind)
    }

    pub fn activate(&mut self, kind: CommandKind, now: Instant) {
        debug!("Blocking command {} active", kind.as_str());
        self.active = Some((kind, now));
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Force-clear once the flag has been held for `ceiling`. Returns true if it was cleared.
    pub fn expire(&mut self, now: Instant, ceiling: Duration) -> bool {
        match self.active {
            Some((kind, since)) if now.saturating_duration_since(since) >= ceiling => {
                warn!(
                    "Blocking command {} exceeded {} ms, clearing",
                    kind.as_str(),
                    ceiling.as_millis()
                );
                self.active = None;
                true
            }
            _ => false,
        }
    }
}

/// Command FIFO with at most one command in flight.
///
/// Holds no I/O, the client drives it from its tick and feeds it the lines
/// read from the transport.
pub struct Coordinator {
    next_id: CommandId,
    queue: Deque<Command, QUEUE_CAPACITY>,
    current: Option<ActiveCommand>,
    completed: Deque<(CommandId, Outcome), OUTCOME_CAPACITY>,
    blocking: BlockingState,
    last_transmit: Option<Instant>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub const fn new() -> Self {
        Self {
            next_id: 1,
            queue: Deque::new(),
            current: None,
            completed: Deque::new(),
            blocking: BlockingState { active: None },
            last_transmit: None,
        }
    }

    pub fn submit(&mut self, text: &str, timeout: Duration) -> Result<CommandId, Error> {
        let kind = CommandKind::classify(text);
        if self.blocking.rejects(kind) {
            warn!("Command rejected while blocking command active: {}", text);
            return Err(Error::Blocked);
        }
        if self.queue.is_full() {
            return Err(Error::QueueFull);
        }

        let id = self.next_id;
        let command = Command {
            id,
            text: String::try_from(text).map_err(|_| Error::CommandTooLong)?,
            kind,
            timeout,
        };
        self.queue
            .push_back(command)
            .map_err(|_| Error::QueueFull)?;
        self.next_id = self.next_id.wrapping_add(1);
        Ok(id)
    }

    pub fn blocking(&self) -> &BlockingState {
        &self.blocking
    }

    pub fn blocking_mut(&mut self) -> &mut BlockingState {
        &mut self.blocking
    }

    pub fn gap_elapsed(&self, now: Instant, gap: Duration) -> bool {
        self.last_transmit
            .map_or(true, |t| now.saturating_duration_since(t) >= gap)
    }

    /// Time left until the next transmission is allowed.
    pub fn gap_remaining(&self, now: Instant, gap: Duration) -> Duration {
        self.last_transmit.map_or(Duration::from_ticks(0), |t| {
            gap.checked_sub(now.saturating_duration_since(t))
                .unwrap_or(Duration::from_ticks(0))
        })
    }

    pub fn mark_transmitted(&mut self, now: Instant) {
        self.last_transmit = Some(now);
    }

    /// Promote the head of the queue to the current command.
    ///
    /// Nothing is promoted while another command is in flight.
    pub fn start_next(&mut self, now: Instant) -> Option<&ActiveCommand> {
        if self.current.is_some() {
            return None;
        }
        let command = self.queue.pop_front()?;
        if command.kind.is_blocking() {
            self.blocking.activate(command.kind, now);
        }
        self.last_transmit = Some(now);
        self.current = Some(ActiveCommand {
            command,
            started: now,
            response: Response::new(),
        });
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&ActiveCommand> {
        self.current.as_ref()
    }

    pub fn executing_kind(&self) -> Option<CommandKind> {
        self.current.as_ref().map(|c| c.command.kind)
    }

    pub fn in_flight(&self) -> Option<CommandId> {
        self.current.as_ref().map(|c| c.command.id)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Add a response line to the current command.
    pub fn append(&mut self, raw: &str) {
        if let Some(current) = self.current.as_mut() {
            append_line(&mut current.response, raw);
        }
    }

    /// Retire the current command if its completion predicate holds.
    pub fn try_complete(&mut self) -> Option<CommandId> {
        let current = self.current.as_ref()?;
        if !current.command.kind.is_complete(&current.response) {
            return None;
        }
        let outcome = Outcome::Response(trimmed(&current.response));
        self.retire(outcome)
    }

    /// Retire the current command as timed out once its timeout has elapsed.
    pub fn try_expire(&mut self, now: Instant) -> Option<CommandId> {
        let current = self.current.as_ref()?;
        if now.saturating_duration_since(current.started) < current.command.timeout {
            return None;
        }
        warn!(
            "Command timeout: {} after {} ms",
            current.command.text.as_str(),
            current.command.timeout.as_millis()
        );
        self.retire(Outcome::Timeout)
    }

    /// Retire the current command as timed out, no matter how long it ran.
    pub fn abort_current(&mut self) -> Option<CommandId> {
        self.current.as_ref()?;
        self.retire(Outcome::Timeout)
    }

    fn retire(&mut self, outcome: Outcome) -> Option<CommandId> {
        let current = self.current.take()?;
        let id = current.command.id;
        if self.blocking.kind() == Some(current.command.kind) {
            self.blocking.clear();
        }
        if self.completed.is_full() {
            let _ = self.completed.pop_front();
        }
        trace!("< {}", outcome.as_str());
        // Room was made above.
        let _ = self.completed.push_back((id, outcome));
        Some(id)
    }

    pub fn is_completed(&self, id: CommandId) -> bool {
        self.completed.iter().any(|(i, _)| *i == id)
    }

    /// Remove and return the outcome of a retired command.
    pub fn take_outcome(&mut self, id: CommandId) -> Option<Outcome> {
        let mut found = None;
        for _ in 0..self.completed.len() {
            let Some(entry) = self.completed.pop_front() else {
                break;
            };
            if entry.0 == id && found.is_none() {
                found = Some(entry.1);
            } else {
                let _ = self.completed.push_back(entry);
            }
        }
        found
    }

    /// Drop everything queued, in flight or retired.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.current = None;
        self.completed.clear();
        self.blocking.clear();
    }
}
