// Script engine: compilation, invocation and the suspension lifecycle
//
// The engine owns everything shared between scripts (symbols, builtins,
// global variables, callable functions) and every live `ScriptState`.
// States that suspend are parked here until the host delivers the reply or
// fires the timer they wait for.

use crate::builtins::{core_builtins, BuiltinDef, BuiltinFn};
use crate::config::ScriptConfig;
use crate::disassembler;
use crate::host::{Host, ObjectId, PlayerId};
use crate::interpreter::Interpreter;
use crate::script::Script;
use crate::script_compiler::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::script_compiler::{CompileError, CoreSymbols, ScriptCompiler};
use crate::script_rand::ScriptRand;
use crate::state::{ExecState, Reply, ReplyKind, Resume, ScriptState, StateId, Suspension};
use crate::variables::VarStorage;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use std::rc::Rc;

pub struct ScriptEngine {
    symbols: SymbolTable,
    builtins: Vec<BuiltinDef>,
    core: CoreSymbols,
    config: ScriptConfig,
    globals: VarStorage,
    /// `callfunc` targets, lowercase names
    functions: IndexMap<String, Rc<Script>>,
    /// Suspended states
    states: IndexMap<StateId, ScriptState>,
    /// State currently owning each player's dialog
    attached: IndexMap<PlayerId, StateId>,
    next_state_id: StateId,
    rng: ScriptRand,
}

/// Whether a reply can resume a state waiting for `kind`
fn accepts(kind: ReplyKind, reply: &Reply) -> bool {
    matches!(
        (kind, reply),
        (ReplyKind::Continue, Reply::Continue)
            | (ReplyKind::Menu, Reply::Menu(_))
            | (ReplyKind::Menu, Reply::Number(_))
            | (ReplyKind::Number, Reply::Number(_))
            | (ReplyKind::Number, Reply::Text(_))
            | (ReplyKind::Text, Reply::Text(_))
            | (ReplyKind::Text, Reply::Number(_))
    )
}

impl ScriptEngine {
    pub fn new(config: ScriptConfig) -> Self {
        let mut symbols = SymbolTable::new();
        let core = CoreSymbols {
            set: symbols.intern("set"),
            goto: symbols.intern("goto"),
            jump_zero: symbols.intern("jump_zero"),
            callsub: symbols.intern("callsub"),
            ret: symbols.intern("return"),
            getelementofarray: symbols.intern("getelementofarray"),
        };
        symbols.intern("@menu");
        let rng = ScriptRand::from_seed(config.rng_seed);
        let mut engine = ScriptEngine {
            symbols,
            builtins: Vec::new(),
            core,
            config,
            globals: VarStorage::new(),
            functions: IndexMap::new(),
            states: IndexMap::new(),
            attached: IndexMap::new(),
            next_state_id: 1,
            rng,
        };
        for (name, signature, func) in core_builtins() {
            engine.register_builtin(name, signature, func);
        }
        engine.set_constant("true", 1);
        engine.set_constant("false", 0);
        debug!("script engine ready with {} builtins", engine.builtins.len());
        engine
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Add or replace a builtin function
    pub fn register_builtin(&mut self, name: &str, signature: &str, func: BuiltinFn) -> SymbolId {
        let symbol = self.symbols.intern(name);
        let def = BuiltinDef {
            name: name.to_string(),
            signature: signature.to_string(),
            func,
        };
        match self.symbols.kind(symbol) {
            SymbolKind::Function(index) => {
                debug!("replacing builtin '{}'", name);
                self.builtins[index] = def;
            }
            SymbolKind::Nop => {
                self.symbols.set_kind(symbol, SymbolKind::Function(self.builtins.len()));
                self.builtins.push(def);
            }
            other => {
                warn!("register_builtin: '{}' is already {:?}, overriding", name, other);
                self.symbols.set_kind(symbol, SymbolKind::Function(self.builtins.len()));
                self.builtins.push(def);
            }
        }
        symbol
    }

    /// Named integer constant usable in scripts and `case` labels
    pub fn set_constant(&mut self, name: &str, value: i32) {
        let symbol = self.symbols.intern(name);
        if let SymbolKind::Function(_) = self.symbols.kind(symbol) {
            warn!("set_constant: '{}' is a builtin, ignored", name);
            return;
        }
        self.symbols.set_kind(symbol, SymbolKind::Constant(value));
    }

    /// Name read and written through `Host::read_param` / `write_param`
    pub fn register_parameter(&mut self, name: &str, param: u32) {
        let symbol = self.symbols.intern(name);
        if let SymbolKind::Function(_) = self.symbols.kind(symbol) {
            warn!("register_parameter: '{}' is a builtin, ignored", name);
            return;
        }
        self.symbols.set_kind(symbol, SymbolKind::Parameter(param));
    }

    /// Compile a script; `start_line` is the line of `source` in its file
    pub fn compile(&mut self, source: &str, file: &str, start_line: usize) -> Result<Rc<Script>, CompileError> {
        let compiler = ScriptCompiler::new(source, &mut self.symbols, &self.builtins, self.core, &self.config);
        let script = compiler.compile(file, start_line)?;
        Ok(Rc::new(script))
    }

    /// Compile, logging the error instead of returning it
    pub fn compile_or_log(&mut self, source: &str, file: &str, start_line: usize) -> Option<Rc<Script>> {
        match self.compile(source, file, start_line) {
            Ok(script) => Some(script),
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    /// Make a script callable through `callfunc`
    pub fn register_function(&mut self, name: &str, script: Rc<Script>) {
        if self.functions.insert(name.to_ascii_lowercase(), script).is_some() {
            warn!("register_function: duplicate function '{}', replaced", name);
        }
    }

    pub fn function(&self, name: &str) -> Option<Rc<Script>> {
        self.functions.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Start a script at `pos`. Returns the state id when the script
    /// suspended, `None` when it ran to completion.
    pub fn invoke(
        &mut self,
        host: &mut dyn Host,
        script: &Rc<Script>,
        pos: usize,
        rid: PlayerId,
        oid: ObjectId,
    ) -> Option<StateId> {
        let id = self.next_state_id;
        self.next_state_id = self.next_state_id.wrapping_add(1).max(1);
        let rid = if rid != 0 && !host.player_online(rid) {
            warn!("invoke: player {} is not online, running '{}' unattached", rid, script.name);
            0
        } else {
            rid
        };
        let mut st = ScriptState::new(id, Rc::clone(script), pos, 0, oid);
        self.attach_player(&mut st, rid);
        self.run(host, st)
    }

    /// Start a script at a named label
    pub fn invoke_label(
        &mut self,
        host: &mut dyn Host,
        script: &Rc<Script>,
        label: &str,
        rid: PlayerId,
        oid: ObjectId,
    ) -> Option<StateId> {
        let Some(pos) = script.label(label) else {
            warn!("invoke_label: no label '{}' in '{}'", label, script.name);
            return None;
        };
        self.invoke(host, script, pos, rid, oid)
    }

    /// Resume the state waiting on `player`'s dialog. Returns false when
    /// no state was waiting for this kind of reply.
    pub fn reply(&mut self, host: &mut dyn Host, player: PlayerId, reply: Reply) -> bool {
        let Some(&id) = self.attached.get(&player) else {
            warn!("reply: player {} has no script attached", player);
            return false;
        };
        let awaiting = self.states.get(&id).and_then(|st| st.awaiting());
        match awaiting {
            Some(kind) if accepts(kind, &reply) => {}
            Some(kind) => {
                warn!("reply: state {} waits for {:?}, got {:?}", id, kind, reply);
                return false;
            }
            None => {
                warn!("reply: state {} is not waiting for input", id);
                return false;
            }
        }
        let Some(mut st) = self.states.shift_remove(&id) else {
            return false;
        };
        st.pending = None;
        st.resume = Some(Resume::Reply(reply));
        self.run(host, st);
        true
    }

    /// Resume a sleeping state whose timer fired
    pub fn timer_elapsed(&mut self, host: &mut dyn Host, id: StateId) -> bool {
        match self.states.get(&id) {
            Some(st) if st.is_sleeping() => {}
            _ => {
                debug!("timer_elapsed: state {} is not sleeping", id);
                return false;
            }
        }
        let Some(mut st) = self.states.shift_remove(&id) else {
            return false;
        };
        st.timer = None;
        st.pending = None;
        st.resume = Some(Resume::TimerElapsed);
        self.run(host, st);
        true
    }

    /// End every state blocked on the player's input. Sleeping states keep
    /// running; `sleep2` notices the player is gone when it wakes up.
    pub fn player_logout(&mut self, host: &mut dyn Host, player: PlayerId) -> usize {
        let waiting: Vec<StateId> = self
            .states
            .values()
            .filter(|st| st.rid == player && st.status == ExecState::Stopped)
            .map(|st| st.id)
            .collect();
        for &id in &waiting {
            if let Some(mut st) = self.states.shift_remove(&id) {
                debug!("player_logout: ending state {} of player {}", id, player);
                st.status = ExecState::End;
                self.dispose(host, st);
            }
        }
        let keep = self
            .attached
            .get(&player)
            .and_then(|id| self.states.get(id))
            .map_or(false, |st| st.rid == player && st.is_sleeping());
        if !keep {
            self.attached.shift_remove(&player);
        }
        waiting.len()
    }

    /// Release the state's player; the state it displaced gets the player back
    pub fn detach(&mut self, id: StateId) -> bool {
        let Some(mut st) = self.states.shift_remove(&id) else {
            return false;
        };
        let detached = st.rid != 0;
        self.release_player(&mut st);
        self.states.insert(id, st);
        detached
    }

    /// Attach a suspended state to an online player, backing up whatever
    /// state the player had. The state's previous player is released first.
    pub fn reattach(&mut self, host: &dyn Host, id: StateId, player: PlayerId) -> bool {
        if player == 0 || !host.player_online(player) {
            warn!("reattach: player {} is not online", player);
            return false;
        }
        let Some(mut st) = self.states.shift_remove(&id) else {
            return false;
        };
        if st.rid != player || self.attached.get(&player) != Some(&id) {
            self.release_player(&mut st);
            self.attach_player(&mut st, player);
        }
        debug!("reattach: state {} now runs for player {}", id, player);
        self.states.insert(id, st);
        true
    }

    /// Run a state until it ends or suspends, then park or dispose of it
    fn run(&mut self, host: &mut dyn Host, mut st: ScriptState) -> Option<StateId> {
        let rid_before = st.rid;
        {
            let mut interp = Interpreter {
                symbols: &self.symbols,
                builtins: &self.builtins,
                config: &self.config,
                globals: &mut self.globals,
                functions: &self.functions,
                rng: &mut self.rng,
                host: &mut *host,
                attached: &self.attached,
            };
            interp.run_script_main(&mut st);
        }
        if st.rid != rid_before {
            self.sync_attachment(&mut st, rid_before);
        }

        let id = st.id;
        match st.status {
            ExecState::Sleeping => {
                let (millis, detach) = match &st.pending {
                    Some(Suspension::Sleep { millis, detach }) => (*millis, *detach),
                    _ => (0, false),
                };
                if detach {
                    self.release_player(&mut st);
                }
                st.timer = Some(host.schedule_timer(millis, id));
                debug!("run: state {} sleeps for {}ms", id, millis);
                self.states.insert(id, st);
                Some(id)
            }
            ExecState::Stopped => {
                debug!("run: state {} waits for {:?}", id, st.awaiting());
                self.states.insert(id, st);
                Some(id)
            }
            _ => {
                self.dispose(host, st);
                None
            }
        }
    }

    /// Follow `attachrid`/`detachrid` done by the script itself
    fn sync_attachment(&mut self, st: &mut ScriptState, rid_before: PlayerId) {
        let new_rid = st.rid;
        if rid_before != 0 {
            st.rid = rid_before;
            self.release_player(st);
        }
        self.attach_player(st, new_rid);
    }

    /// Make `st` the player's attached state; the state it displaces
    /// becomes its backup
    fn attach_player(&mut self, st: &mut ScriptState, player: PlayerId) {
        st.rid = player;
        if player == 0 {
            return;
        }
        if let Some(previous) = self.attached.insert(player, st.id) {
            if previous != st.id {
                debug!("state {} backs up state {} on player {}", st.id, previous, player);
                st.backup = Some(previous);
            }
        }
    }

    fn release_player(&mut self, st: &mut ScriptState) {
        let rid = st.rid;
        if rid == 0 {
            return;
        }
        st.rid = 0;
        let backup = st.backup.take();
        if self.attached.get(&rid) != Some(&st.id) {
            // Displaced by a nested state: splice it out of that state's chain
            if let Some(above) = self.states.values_mut().find(|other| other.backup == Some(st.id)) {
                above.backup = backup;
            }
            return;
        }
        match backup {
            Some(backup) if self.states.get(&backup).map_or(false, |b| b.rid == rid) => {
                debug!("state {} hands player {} back to state {}", st.id, rid, backup);
                self.attached.insert(rid, backup);
            }
            _ => {
                self.attached.shift_remove(&rid);
            }
        }
    }

    fn dispose(&mut self, host: &mut dyn Host, mut st: ScriptState) {
        if let Some(timer) = st.timer.take() {
            host.cancel_timer(timer);
        }
        self.release_player(&mut st);
        debug!("state {} of '{}' finished", st.id, st.script.name);
    }

    pub fn symbol(&self, name: &str) -> Option<SymbolId> {
        self.symbols.lookup(name)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Suspended state by id
    pub fn state(&self, id: StateId) -> Option<&ScriptState> {
        self.states.get(&id)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// State owning the player's dialog
    pub fn attached_state(&self, player: PlayerId) -> Option<StateId> {
        self.attached.get(&player).copied()
    }

    pub fn global_int(&self, name: &str) -> i32 {
        self.global_int_at(name, 0)
    }

    pub fn global_int_at(&self, name: &str, index: u32) -> i32 {
        self.symbol(name)
            .map(|symbol| self.globals.get_int(symbol, index))
            .unwrap_or(0)
    }

    pub fn global_str(&self, name: &str) -> String {
        self.symbol(name)
            .map(|symbol| self.globals.get_str(symbol, 0))
            .unwrap_or_default()
    }

    pub fn set_global_int(&mut self, name: &str, value: i32) {
        let symbol = self.symbols.intern(name);
        self.globals.set_int(symbol, 0, value);
    }

    pub fn set_global_str(&mut self, name: &str, value: &str) {
        let symbol = self.symbols.intern(name);
        self.globals.set_str(symbol, 0, value);
    }

    /// Bytecode listing of a compiled script
    pub fn disassemble(&self, script: &Script) -> String {
        disassembler::disassemble(script, &self.symbols)
    }

    /// Log a summary of live states
    pub fn report(&self) {
        info!(
            "{} suspended states, {} attached players, {} functions",
            self.states.len(),
            self.attached.len(),
            self.functions.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use test_log::test;

    #[test]
    fn test_reply_kinds() {
        assert!(accepts(ReplyKind::Menu, &Reply::Menu(2)));
        assert!(accepts(ReplyKind::Number, &Reply::Text("5".into())));
        assert!(!accepts(ReplyKind::Continue, &Reply::Menu(1)));
        assert!(!accepts(ReplyKind::Menu, &Reply::Text("x".into())));
    }

    #[test]
    fn test_register_builtin_replaces() {
        fn noop(_: &mut crate::context::ScriptContext) -> Result<crate::builtins::BuiltinOutcome, crate::value::RuntimeError> {
            Ok(crate::builtins::BuiltinOutcome::Completed)
        }
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let count = engine.builtins.len();
        let first = engine.register_builtin("announce", "s", noop);
        let second = engine.register_builtin("Announce", "si", noop);
        assert_eq!(first, second);
        assert_eq!(engine.builtins.len(), count + 1);
        assert_eq!(engine.builtins[count].signature, "si");
    }

    #[test]
    fn test_nested_invocation_restores_backup() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let mut host = MemoryHost::new();
        host.add_player(1);
        let outer = engine.compile("mes \"outer\"; next; mes \"done\"; close;", "outer", 1).unwrap();
        let inner = engine.compile("mes \"inner\"; next; close;", "inner", 1).unwrap();

        let first = engine.invoke(&mut host, &outer, 0, 1, 0).unwrap();
        let second = engine.invoke(&mut host, &inner, 0, 1, 0).unwrap();
        assert_eq!(engine.attached_state(1), Some(second));

        assert!(engine.reply(&mut host, 1, Reply::Continue));
        assert_eq!(engine.attached_state(1), Some(first));
        assert!(engine.state(second).is_none());

        assert!(engine.reply(&mut host, 1, Reply::Continue));
        assert_eq!(engine.attached_state(1), None);
        assert_eq!(engine.state_count(), 0);
    }

    #[test]
    fn test_logout_ends_waiting_states() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let mut host = MemoryHost::new();
        host.add_player(4);
        let script = engine.compile("mes \"hi\"; next; $after = 1; end;", "logout", 1).unwrap();
        assert!(engine.invoke(&mut host, &script, 0, 4, 0).is_some());
        host.set_online(4, false);
        assert_eq!(engine.player_logout(&mut host, 4), 1);
        assert_eq!(engine.state_count(), 0);
        assert_eq!(engine.global_int("$after"), 0);
        assert!(!engine.reply(&mut host, 4, Reply::Continue));
    }

    #[test]
    fn test_detach_and_reattach() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let mut host = MemoryHost::new();
        host.add_player(2);
        host.add_player(3);
        let script = engine.compile("next; end;", "attach", 1).unwrap();
        let id = engine.invoke(&mut host, &script, 0, 2, 0).unwrap();
        assert!(engine.detach(id));
        assert_eq!(engine.attached_state(2), None);
        assert!(engine.reattach(&host, id, 3));
        assert_eq!(engine.attached_state(3), Some(id));
        assert!(engine.reply(&mut host, 3, Reply::Continue));
        assert_eq!(engine.state_count(), 0);
    }

    #[test]
    fn test_reattach_moves_an_attached_state() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let mut host = MemoryHost::new();
        host.add_player(2);
        host.add_player(3);
        let outer = engine.compile("$o = select(\"A:B\"); end;", "outer", 1).unwrap();
        let inner = engine.compile("next; $inner = 1; end;", "inner", 1).unwrap();
        let first = engine.invoke(&mut host, &outer, 0, 2, 0).unwrap();
        let second = engine.invoke(&mut host, &inner, 0, 2, 0).unwrap();

        assert!(!engine.reattach(&host, second, 9));
        assert_eq!(engine.attached_state(2), Some(second));

        assert!(engine.reattach(&host, second, 3));
        assert_eq!(engine.attached_state(2), Some(first));
        assert_eq!(engine.attached_state(3), Some(second));
        assert!(!engine.reply(&mut host, 2, Reply::Continue));
        assert!(engine.reply(&mut host, 3, Reply::Continue));
        assert_eq!(engine.global_int("$inner"), 1);
        assert_eq!(engine.attached_state(3), None);
        assert_eq!(engine.attached_state(2), Some(first));

        assert!(engine.reply(&mut host, 2, Reply::Menu(2)));
        assert_eq!(engine.global_int("$o"), 2);
        assert_eq!(engine.state_count(), 0);
    }

    #[test]
    fn test_reattach_displaced_state_keeps_the_chain() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let mut host = MemoryHost::new();
        host.add_player(2);
        host.add_player(3);
        let waiting = engine.compile("next; end;", "waiting", 1).unwrap();
        let bottom = engine.invoke(&mut host, &waiting, 0, 2, 0).unwrap();
        let middle = engine.invoke(&mut host, &waiting, 0, 2, 0).unwrap();
        let top = engine.invoke(&mut host, &waiting, 0, 2, 0).unwrap();

        assert!(engine.reattach(&host, middle, 3));
        assert_eq!(engine.attached_state(2), Some(top));
        assert_eq!(engine.attached_state(3), Some(middle));
        assert!(engine.reply(&mut host, 2, Reply::Continue));
        assert_eq!(engine.attached_state(2), Some(bottom));
        assert!(engine.reply(&mut host, 2, Reply::Continue));
        assert!(engine.reply(&mut host, 3, Reply::Continue));
        assert_eq!(engine.state_count(), 0);
    }

    #[test]
    fn test_logout_keeps_a_sleeping_state_attached() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let mut host = MemoryHost::new();
        host.add_player(5);
        let script = engine
            .compile("sleep2 100; mes \"back\"; next; $after = 1; end;", "relog", 1)
            .unwrap();
        let id = engine.invoke(&mut host, &script, 0, 5, 0).unwrap();
        host.set_online(5, false);
        assert_eq!(engine.player_logout(&mut host, 5), 0);
        assert_eq!(engine.attached_state(5), Some(id));

        host.set_online(5, true);
        for fired in host.advance(100) {
            assert!(engine.timer_elapsed(&mut host, fired));
        }
        assert_eq!(engine.attached_state(5), Some(id));
        assert!(engine.reply(&mut host, 5, Reply::Continue));
        assert_eq!(engine.global_int("$after"), 1);
        assert_eq!(engine.state_count(), 0);
    }
}
