// Collaborator interface between the script engine and the game server
//
// The engine never owns players, maps or timers. Everything it needs from the
// outside world goes through `Host`. `MemoryHost` is a complete in-memory
// implementation used by the command line runner and the tests.

use crate::engine::ScriptEngine;
use crate::state::StateId;
use crate::variables::{VarStorage, VariableScope};
use indexmap::IndexMap;
use log::debug;

pub type PlayerId = u32;
pub type ObjectId = u32;
pub type TimerHandle = u32;

/// Dialog traffic a script sends to its player
#[derive(Debug, Clone, PartialEq)]
pub enum DialogEvent {
    Message(String),
    Next,
    Close,
    Menu(Vec<String>),
    InputNumber,
    InputText,
}

pub trait Host {
    fn player_online(&self, player: PlayerId) -> bool;

    /// Storage for a player-bound namespace (character, temporary, account)
    fn player_vars(&mut self, player: PlayerId, scope: VariableScope) -> Option<&mut VarStorage>;

    /// Storage of the map instance the object lives in
    fn instance_vars(&mut self, _object: ObjectId) -> Option<&mut VarStorage> {
        None
    }

    fn read_param(&mut self, _player: PlayerId, _param: u32) -> Option<i32> {
        None
    }

    /// Returns false when the parameter could not be written
    fn write_param(&mut self, _player: PlayerId, _param: u32, _value: i32) -> bool {
        false
    }

    fn dialog(&mut self, player: PlayerId, object: ObjectId, event: DialogEvent);

    fn debug_message(&mut self, object: ObjectId, message: &str);

    /// Ask for `ScriptEngine::timer_elapsed(state)` after `delay_ms`
    fn schedule_timer(&mut self, delay_ms: u32, state: StateId) -> TimerHandle;

    fn cancel_timer(&mut self, handle: TimerHandle);

    /// "name (map x,y)" of an object, for diagnostics
    fn describe_object(&self, _object: ObjectId) -> Option<String> {
        None
    }
}

/// Player record held by `MemoryHost`
#[derive(Debug, Default)]
pub struct PlayerRecord {
    pub online: bool,
    pub vars: IndexMap<VariableScope, VarStorage>,
    pub params: IndexMap<u32, i32>,
    pub dialog: Vec<DialogEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingTimer {
    pub handle: TimerHandle,
    pub due: u64,
    pub state: StateId,
}

/// In-memory host with a virtual millisecond clock
#[derive(Debug, Default)]
pub struct MemoryHost {
    pub players: IndexMap<PlayerId, PlayerRecord>,
    pub instances: IndexMap<ObjectId, VarStorage>,
    pub objects: IndexMap<ObjectId, String>,
    pub debug_log: Vec<String>,
    pub timers: Vec<PendingTimer>,
    pub clock: u64,
    next_timer: TimerHandle,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_player(&mut self, player: PlayerId) {
        self.players.entry(player).or_default().online = true;
    }

    pub fn set_online(&mut self, player: PlayerId, online: bool) {
        if let Some(record) = self.players.get_mut(&player) {
            record.online = online;
        }
    }

    pub fn add_object(&mut self, object: ObjectId, description: &str) {
        self.objects.insert(object, description.to_string());
    }

    /// Give an object an instance storage
    pub fn add_instance_object(&mut self, object: ObjectId) {
        self.instances.entry(object).or_default();
    }

    pub fn player(&self, player: PlayerId) -> Option<&PlayerRecord> {
        self.players.get(&player)
    }

    /// Drain the dialog events sent to a player
    pub fn take_dialog(&mut self, player: PlayerId) -> Vec<DialogEvent> {
        self.players
            .get_mut(&player)
            .map(|record| std::mem::take(&mut record.dialog))
            .unwrap_or_default()
    }

    pub fn set_param(&mut self, player: PlayerId, param: u32, value: i32) {
        if let Some(record) = self.players.get_mut(&player) {
            record.params.insert(param, value);
        }
    }

    /// Read a player variable by name
    pub fn player_int(&self, engine: &ScriptEngine, player: PlayerId, name: &str) -> i32 {
        let Some(symbol) = engine.symbol(name) else {
            return 0;
        };
        self.players
            .get(&player)
            .and_then(|record| record.vars.get(&VariableScope::from_name(name)))
            .map(|vars| vars.get_int(symbol, 0))
            .unwrap_or(0)
    }

    pub fn player_str(&self, engine: &ScriptEngine, player: PlayerId, name: &str) -> String {
        let Some(symbol) = engine.symbol(name) else {
            return String::new();
        };
        self.players
            .get(&player)
            .and_then(|record| record.vars.get(&VariableScope::from_name(name)))
            .map(|vars| vars.get_str(symbol, 0))
            .unwrap_or_default()
    }

    /// Earliest pending timer, if any
    pub fn next_due(&self) -> Option<u64> {
        self.timers.iter().map(|t| t.due).min()
    }

    /// Advance the clock and return the states whose timers fired, in due order
    pub fn advance(&mut self, millis: u64) -> Vec<StateId> {
        self.clock += millis;
        let clock = self.clock;
        let mut fired: Vec<PendingTimer> = Vec::new();
        self.timers.retain(|t| {
            if t.due <= clock {
                fired.push(t.clone());
                false
            } else {
                true
            }
        });
        fired.sort_by_key(|t| (t.due, t.handle));
        fired.into_iter().map(|t| t.state).collect()
    }
}

impl Host for MemoryHost {
    fn player_online(&self, player: PlayerId) -> bool {
        self.players.get(&player).map(|p| p.online).unwrap_or(false)
    }

    fn player_vars(&mut self, player: PlayerId, scope: VariableScope) -> Option<&mut VarStorage> {
        let record = self.players.get_mut(&player)?;
        if !record.online {
            return None;
        }
        Some(record.vars.entry(scope).or_default())
    }

    fn instance_vars(&mut self, object: ObjectId) -> Option<&mut VarStorage> {
        self.instances.get_mut(&object)
    }

    fn read_param(&mut self, player: PlayerId, param: u32) -> Option<i32> {
        self.players
            .get(&player)
            .map(|record| record.params.get(&param).copied().unwrap_or(0))
    }

    fn write_param(&mut self, player: PlayerId, param: u32, value: i32) -> bool {
        match self.players.get_mut(&player) {
            Some(record) => {
                record.params.insert(param, value);
                true
            }
            None => false,
        }
    }

    fn dialog(&mut self, player: PlayerId, _object: ObjectId, event: DialogEvent) {
        if let Some(record) = self.players.get_mut(&player) {
            record.dialog.push(event);
        }
    }

    fn debug_message(&mut self, _object: ObjectId, message: &str) {
        debug!("debugmes: {}", message);
        self.debug_log.push(message.to_string());
    }

    fn schedule_timer(&mut self, delay_ms: u32, state: StateId) -> TimerHandle {
        self.next_timer += 1;
        let handle = self.next_timer;
        self.timers.push(PendingTimer {
            handle,
            due: self.clock + delay_ms as u64,
            state,
        });
        handle
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        self.timers.retain(|t| t.handle != handle);
    }

    fn describe_object(&self, object: ObjectId) -> Option<String> {
        self.objects.get(&object).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_timers_fire_in_due_order() {
        let mut host = MemoryHost::new();
        host.schedule_timer(300, 2);
        host.schedule_timer(100, 1);
        let cancelled = host.schedule_timer(200, 3);
        host.cancel_timer(cancelled);
        assert_eq!(host.next_due(), Some(100));
        assert_eq!(host.advance(50), Vec::<StateId>::new());
        assert_eq!(host.advance(500), vec![1, 2]);
        assert!(host.timers.is_empty());
    }

    #[test]
    fn test_offline_players_have_no_storage() {
        let mut host = MemoryHost::new();
        host.add_player(5);
        assert!(host.player_vars(5, VariableScope::Character).is_some());
        host.set_online(5, false);
        assert!(host.player_vars(5, VariableScope::Character).is_none());
        assert!(host.player_vars(6, VariableScope::Character).is_none());
    }
}
