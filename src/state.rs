// Execution state of one script invocation

use crate::host::{ObjectId, PlayerId, TimerHandle};
use crate::script::Script;
use crate::value::ScriptStack;
use crate::variables::VarStorage;
use std::cell::RefCell;
use std::rc::Rc;

pub type StateId = u32;

/// Interpreter status of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Running,
    /// Waiting for a player reply
    Stopped,
    /// Just branched; the main loop re-enters at `pos`
    Goto,
    /// Finished; the state will be disposed
    End,
    /// `return` executed, caller frame must be restored
    ReturnFromFunction,
    /// Builtin asked to be dispatched again after an external event
    Rerun,
    /// Waiting for a timer
    Sleeping,
}

/// What a suspended builtin waits for
#[derive(Debug, Clone, PartialEq)]
pub enum Suspension {
    Reply(ReplyKind),
    Sleep { millis: u32, detach: bool },
}

/// Kind of player reply a state is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// "next" / close acknowledgement
    Continue,
    /// 1-based menu choice, 255 = cancel
    Menu,
    Number,
    Text,
}

/// Reply supplied by the host when the player answers
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Continue,
    Menu(u32),
    Number(i32),
    Text(String),
}

impl Reply {
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::Continue => ReplyKind::Continue,
            Reply::Menu(_) => ReplyKind::Menu,
            Reply::Number(_) => ReplyKind::Number,
            Reply::Text(_) => ReplyKind::Text,
        }
    }
}

/// Token handed to a builtin when it is dispatched again after suspending
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    Reply(Reply),
    TimerElapsed,
}

pub struct ScriptState {
    pub id: StateId,
    pub script: Rc<Script>,
    /// Next bytecode position
    pub pos: usize,
    pub stack: ScriptStack,
    /// `.@` variables of the current activation
    pub(crate) scope: Rc<RefCell<VarStorage>>,
    pub status: ExecState,
    /// Controlling player, 0 if none
    pub rid: PlayerId,
    /// Originating in-world object
    pub oid: ObjectId,
    /// Loop guard disabled by `freeloop`
    pub freeloop: bool,
    /// State displaced by this one on the same player
    pub(crate) backup: Option<StateId>,
    pub(crate) pending: Option<Suspension>,
    pub(crate) resume: Option<Resume>,
    pub(crate) timer: Option<TimerHandle>,
    /// Frame of the builtin being dispatched: name slot and end of arguments
    pub(crate) call_start: usize,
    pub(crate) call_end: usize,
}

impl ScriptState {
    pub fn new(id: StateId, script: Rc<Script>, pos: usize, rid: PlayerId, oid: ObjectId) -> Self {
        ScriptState {
            id,
            script,
            pos,
            stack: ScriptStack::new(),
            scope: Rc::new(RefCell::new(VarStorage::new())),
            status: ExecState::Running,
            rid,
            oid,
            freeloop: false,
            backup: None,
            pending: None,
            resume: None,
            timer: None,
            call_start: 0,
            call_end: 0,
        }
    }

    /// Reply kind this state is blocked on, if any
    pub fn awaiting(&self) -> Option<ReplyKind> {
        match (&self.status, &self.pending) {
            (ExecState::Stopped, Some(Suspension::Reply(kind))) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_sleeping(&self) -> bool {
        self.status == ExecState::Sleeping
    }

    /// Snapshot of the current `.@` variables
    pub fn scope_vars(&self) -> VarStorage {
        self.scope.borrow().clone()
    }
}
