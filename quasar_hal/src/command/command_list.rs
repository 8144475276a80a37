//! Command list bookkeeping
//!
//! Every list goes through
//! `Recording -> Recorded -> Executing -> Free`. Entries live in a
//! [`SlotMap`] with stable keys; `Free` entries are pruned when the next
//! list is requested, after which their ids resolve to `None`.

use std::any::Any;
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

use crate::backend::NativeCommandList;
use crate::command::FrameTicket;
use crate::error::{Error, Result};
use crate::hal_error;
use crate::resource::Resource;
use crate::types::{QueueType, ResourceState};

// ===== SLOT MAP KEY =====

new_key_type! {
    /// Stable handle to a command list owned by the device
    pub struct CommandListId;
}

/// Object kept alive until the GPU is done with a list
pub type Retained = Arc<dyn Any + Send + Sync>;

/// Subresource state a list leaves behind once executed
pub type FinalState = (Arc<dyn Resource>, u32, ResourceState);

/// Lifecycle state of a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    Invalid,
    Recording,
    Recorded,
    Executing,
    Free,
}

struct CommandListEntry {
    state: CommandListState,
    queue: QueueType,
    native: Option<Box<dyn NativeCommandList>>,
    ticket: FrameTicket,
    fence_value: u64,
    final_states: Vec<FinalState>,
    retained: Vec<Retained>,
}

/// Pool of command list entries
#[derive(Default)]
pub struct CommandListManager {
    entries: SlotMap<CommandListId, CommandListEntry>,
}

impl CommandListManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a list that starts recording
    pub fn request(&mut self, queue: QueueType, ticket: FrameTicket) -> CommandListId {
        self.entries.retain(|_, entry| entry.state != CommandListState::Free);
        self.entries.insert(CommandListEntry {
            state: CommandListState::Recording,
            queue,
            native: None,
            ticket,
            fence_value: 0,
            final_states: Vec::new(),
            retained: Vec::new(),
        })
    }

    /// State of a list (`None` once its entry was pruned)
    pub fn state(&self, id: CommandListId) -> Option<CommandListState> {
        self.entries.get(id).map(|e| e.state)
    }

    pub fn queue(&self, id: CommandListId) -> Option<QueueType> {
        self.entries.get(id).map(|e| e.queue)
    }

    pub fn ticket(&self, id: CommandListId) -> Option<&FrameTicket> {
        self.entries.get(id).map(|e| &e.ticket)
    }

    pub fn fence_value(&self, id: CommandListId) -> Option<u64> {
        self.entries
            .get(id)
            .filter(|e| e.state == CommandListState::Executing)
            .map(|e| e.fence_value)
    }

    /// Sealed native list of a `Recorded` entry
    pub fn native(&self, id: CommandListId) -> Option<&dyn NativeCommandList> {
        self.entries
            .get(id)
            .filter(|e| e.state == CommandListState::Recorded)
            .and_then(|e| e.native.as_deref())
    }

    /// Recording finished: store the sealed list and what it leaves behind
    pub fn mark_recorded(
        &mut self,
        id: CommandListId,
        native: Box<dyn NativeCommandList>,
        final_states: Vec<FinalState>,
        retained: Vec<Retained>,
    ) -> Result<()> {
        let entry = self.expect_state(id, CommandListState::Recording)?;
        entry.state = CommandListState::Recorded;
        entry.native = Some(native);
        entry.final_states = final_states;
        entry.retained = retained;
        Ok(())
    }

    /// List handed to the queue (or discarded) with `fence_value`
    ///
    /// Returns the final states to apply to the resources.
    pub fn begin_execute(&mut self, id: CommandListId, fence_value: u64) -> Result<Vec<FinalState>> {
        let entry = self.expect_state(id, CommandListState::Recorded)?;
        entry.state = CommandListState::Executing;
        entry.fence_value = fence_value;
        Ok(std::mem::take(&mut entry.final_states))
    }

    /// Retire every executing list whose fence value is reached
    ///
    /// Entries become `Free` and drop their native list and retained
    /// objects. Returns the tickets in fence order.
    pub fn complete(&mut self, completed_value: u64) -> Vec<FrameTicket> {
        let mut done: Vec<(u64, FrameTicket)> = Vec::new();
        for (_, entry) in self.entries.iter_mut() {
            if entry.state == CommandListState::Executing && entry.fence_value <= completed_value {
                entry.state = CommandListState::Free;
                entry.native = None;
                entry.retained.clear();
                done.push((entry.fence_value, entry.ticket.clone()));
            }
        }
        done.sort_by_key(|(value, ticket)| (*value, ticket.frame_index));
        done.into_iter().map(|(_, ticket)| ticket).collect()
    }

    /// Number of entries not yet `Free`
    pub fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state != CommandListState::Free)
            .count()
    }

    pub fn executing_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == CommandListState::Executing)
            .count()
    }

    fn expect_state(&mut self, id: CommandListId, expected: CommandListState) -> Result<&mut CommandListEntry> {
        let state = self.state(id).unwrap_or(CommandListState::Invalid);
        if state != expected {
            let message = format!("Command list {:?} is {:?}, expected {:?}", id, state, expected);
            hal_error!("quasar::CommandListManager", "{}", message);
            return Err(Error::InvalidState(message));
        }
        self.entries
            .get_mut(id)
            .ok_or_else(|| Error::InvalidState(format!("command list {:?} vanished", id)))
    }
}

#[cfg(test)]
#[path = "command_list_tests.rs"]
mod tests;
