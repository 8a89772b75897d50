/// Scripts that wait for player replies or timers, and the attachment of
/// states to players across suspensions
use hercscript::{DialogEvent, MemoryHost, Reply, ReplyKind, ScriptConfig, ScriptEngine, StateId};
use test_log::test;

const PLAYER: u32 = 1;

fn setup() -> (ScriptEngine, MemoryHost) {
    let mut host = MemoryHost::new();
    host.add_player(PLAYER);
    (ScriptEngine::new(ScriptConfig::default()), host)
}

fn start(engine: &mut ScriptEngine, host: &mut MemoryHost, source: &str) -> Option<StateId> {
    let script = engine.compile(source, "test", 1).expect("script compiles");
    engine.invoke(host, &script, 0, PLAYER, 0)
}

#[test]
fn test_input_resumes_at_the_call_and_clamps() {
    let (mut engine, mut host) = setup();
    let source = r#"
        $before += 1;
        mes "How many?";
        $res = input(.@n, 1, 10);
        $n = .@n;
        end;
    "#;
    let id = start(&mut engine, &mut host, source).expect("waits for input");
    let waiting = engine.state(id).unwrap();
    assert_eq!(waiting.awaiting(), Some(ReplyKind::Number));
    assert!(waiting.scope_vars().is_empty());
    assert_eq!(
        host.take_dialog(PLAYER),
        vec![DialogEvent::Message("How many?".to_string()), DialogEvent::InputNumber]
    );

    assert!(engine.reply(&mut host, PLAYER, Reply::Number(50)));
    assert_eq!(engine.global_int("$before"), 1);
    assert_eq!(engine.global_int("$n"), 10);
    assert_eq!(engine.global_int("$res"), 1);
    assert_eq!(engine.state_count(), 0);

    start(&mut engine, &mut host, source).expect("waits for input");
    assert!(engine.reply(&mut host, PLAYER, Reply::Number(-5)));
    assert_eq!(engine.global_int("$n"), 1);
    assert_eq!(engine.global_int("$res"), -1);

    start(&mut engine, &mut host, source).expect("waits for input");
    assert!(engine.reply(&mut host, PLAYER, Reply::Number(7)));
    assert_eq!(engine.global_int("$n"), 7);
    assert_eq!(engine.global_int("$res"), 0);
    assert_eq!(engine.global_int("$before"), 3);
}

#[test]
fn test_text_input() {
    let (mut engine, mut host) = setup();
    start(&mut engine, &mut host, "input .@s$; $s$ = .@s$; end;").expect("waits");
    assert_eq!(host.take_dialog(PLAYER), vec![DialogEvent::InputText]);
    assert!(engine.reply(&mut host, PLAYER, Reply::Text("hello".to_string())));
    assert_eq!(engine.global_str("$s$"), "hello");
}

#[test]
fn test_menu_jumps_to_the_chosen_label() {
    let source = r#"
        menu "Yes:Maybe", L_Yes, "No", L_No, "Skip", -;
        $path = 3;
        end;
    L_Yes:
        $path = 1;
        end;
    L_No:
        $path = 2;
        end;
    "#;
    for (choice, path) in [(2, 1), (3, 2), (4, 3), (255, 0)] {
        let (mut engine, mut host) = setup();
        start(&mut engine, &mut host, source).expect("waits for menu");
        assert_eq!(
            host.take_dialog(PLAYER),
            vec![DialogEvent::Menu(vec![
                "Yes".to_string(),
                "Maybe".to_string(),
                "No".to_string(),
                "Skip".to_string()
            ])]
        );
        assert!(engine.reply(&mut host, PLAYER, Reply::Menu(choice)));
        assert_eq!(engine.global_int("$path"), path, "choice {}", choice);
        if choice != 255 {
            assert_eq!(host.player_int(&engine, PLAYER, "@menu"), choice as i32);
        }
        assert_eq!(engine.state_count(), 0);
    }
}

#[test]
fn test_select_and_prompt() {
    let (mut engine, mut host) = setup();
    start(&mut engine, &mut host, "$c = select(\"A:B\", \"C\"); end;").expect("waits");
    assert!(engine.reply(&mut host, PLAYER, Reply::Menu(3)));
    assert_eq!(engine.global_int("$c"), 3);
    assert_eq!(host.player_int(&engine, PLAYER, "@menu"), 3);

    start(&mut engine, &mut host, "$c2 = select(\"A\"); $after = 1;").expect("waits");
    assert!(engine.reply(&mut host, PLAYER, Reply::Menu(255)));
    assert_eq!(engine.global_int("$after"), 0);

    start(&mut engine, &mut host, "$p = prompt(\"A:B\"); $after2 = 1;").expect("waits");
    assert!(engine.reply(&mut host, PLAYER, Reply::Menu(255)));
    assert_eq!(engine.global_int("$p"), 255);
    assert_eq!(engine.global_int("$after2"), 1);
}

#[test]
fn test_next_and_close2() {
    let (mut engine, mut host) = setup();
    start(
        &mut engine,
        &mut host,
        "mes \"a\"; next; mes \"b\"; close2; $after = 1; end;",
    )
    .expect("waits for next");
    assert_eq!(
        host.take_dialog(PLAYER),
        vec![DialogEvent::Message("a".to_string()), DialogEvent::Next]
    );
    assert!(!engine.reply(&mut host, PLAYER, Reply::Menu(1)));
    assert!(engine.reply(&mut host, PLAYER, Reply::Continue));
    assert_eq!(
        host.take_dialog(PLAYER),
        vec![DialogEvent::Message("b".to_string()), DialogEvent::Close]
    );
    assert_eq!(engine.global_int("$after"), 0);
    assert!(engine.reply(&mut host, PLAYER, Reply::Continue));
    assert_eq!(engine.global_int("$after"), 1);
    assert_eq!(engine.state_count(), 0);
}

#[test]
fn test_close_ends_the_script() {
    let (mut engine, mut host) = setup();
    assert!(start(&mut engine, &mut host, "mes \"bye\"; close; $after = 1;").is_none());
    assert_eq!(engine.global_int("$after"), 0);
    assert_eq!(
        host.take_dialog(PLAYER),
        vec![DialogEvent::Message("bye".to_string()), DialogEvent::Close]
    );
}

#[test]
fn test_sleep_detaches_and_resumes_on_timer() {
    let (mut engine, mut host) = setup();
    let id = start(&mut engine, &mut host, "$a = 1; sleep 1000; $b = 1; quest = 1; end;")
        .expect("sleeps");
    assert!(engine.state(id).unwrap().is_sleeping());
    assert_eq!(engine.attached_state(PLAYER), None);
    assert_eq!(engine.global_int("$a"), 1);

    assert!(host.advance(999).is_empty());
    let fired = host.advance(1);
    assert_eq!(fired, vec![id]);
    assert!(engine.timer_elapsed(&mut host, id));
    assert_eq!(engine.global_int("$b"), 1);
    assert_eq!(host.player_int(&engine, PLAYER, "quest"), 0);
    assert_eq!(engine.state_count(), 0);
    assert!(!engine.timer_elapsed(&mut host, id));
}

#[test]
fn test_sleep2_keeps_the_player() {
    let (mut engine, mut host) = setup();
    let id = start(&mut engine, &mut host, "sleep2 100; quest = 7; end;").expect("sleeps");
    assert_eq!(engine.attached_state(PLAYER), Some(id));
    for state in host.advance(100) {
        engine.timer_elapsed(&mut host, state);
    }
    assert_eq!(host.player_int(&engine, PLAYER, "quest"), 7);

    let id = start(&mut engine, &mut host, "sleep2 100; $after = 1; end;").expect("sleeps");
    host.set_online(PLAYER, false);
    for state in host.advance(100) {
        assert_eq!(state, id);
        engine.timer_elapsed(&mut host, state);
    }
    assert_eq!(engine.global_int("$after"), 0);
    assert_eq!(engine.state_count(), 0);
}

#[test]
fn test_inner_script_hands_the_player_back() {
    let (mut engine, mut host) = setup();
    let outer = start(&mut engine, &mut host, "$o = select(\"A:B\"); end;").expect("waits");
    assert!(start(&mut engine, &mut host, "debugmes \"inner\"; end;").is_none());
    assert_eq!(host.debug_log, vec!["inner".to_string()]);
    assert_eq!(engine.attached_state(PLAYER), Some(outer));
    assert!(engine.reply(&mut host, PLAYER, Reply::Menu(2)));
    assert_eq!(engine.global_int("$o"), 2);
}

#[test]
fn test_logout_ends_a_waiting_script() {
    let (mut engine, mut host) = setup();
    start(&mut engine, &mut host, "input .@x; $after = 1;").expect("waits");
    host.set_online(PLAYER, false);
    assert_eq!(engine.player_logout(&mut host, PLAYER), 1);
    assert_eq!(engine.state_count(), 0);
    assert_eq!(engine.global_int("$after"), 0);
}

#[test]
fn test_dialog_without_player_ends_script() {
    let (mut engine, mut host) = setup();
    let script = engine.compile("$a = 1; next; $b = 1;", "orphan", 1).unwrap();
    assert!(engine.invoke(&mut host, &script, 0, 0, 0).is_none());
    assert_eq!(engine.global_int("$a"), 1);
    assert_eq!(engine.global_int("$b"), 0);
}

#[test]
fn test_invoke_label() {
    let (mut engine, mut host) = setup();
    let script = engine
        .compile("end;\nOnTalk:\n$talked = 1;\nend;", "labels", 1)
        .unwrap();
    assert!(engine.invoke_label(&mut host, &script, "ontalk", PLAYER, 0).is_none());
    assert_eq!(engine.global_int("$talked"), 1);
    assert!(engine.invoke_label(&mut host, &script, "OnMissing", PLAYER, 0).is_none());
}
