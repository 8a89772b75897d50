/// End-to-end checks of expression evaluation, control flow, variables and
/// subroutine calls, run against the in-memory host
use hercscript::{MemoryHost, ScriptConfig, ScriptEngine};
use test_log::test;

const PLAYER: u32 = 1;

fn engine() -> ScriptEngine {
    ScriptEngine::new(ScriptConfig {
        rng_seed: Some(7),
        ..ScriptConfig::default()
    })
}

fn host() -> MemoryHost {
    let mut host = MemoryHost::new();
    host.add_player(PLAYER);
    host
}

/// Compile and run `source` for the test player until it ends or suspends
fn run_in(engine: &mut ScriptEngine, host: &mut MemoryHost, source: &str) {
    let script = engine.compile(source, "test", 1).expect("script compiles");
    engine.invoke(host, &script, 0, PLAYER, 0);
}

fn run(source: &str) -> (ScriptEngine, MemoryHost) {
    let mut engine = engine();
    let mut host = host();
    run_in(&mut engine, &mut host, source);
    (engine, host)
}

#[test]
fn test_operator_precedence() {
    let (engine, _) = run(
        r#"
        $a = 1 + 2 * 3;
        $b = (1 + 2) * 3 - 3;
        $c = 0 ? 2 : 1 ? 3 : 4;
        $d = 1 < 2 == 1;
        $e = 7 % 3 << 2 | 1;
        $f = -3 * -3;
        $g = !0 + ~0;
        end;
    "#,
    );
    assert_eq!(engine.global_int("$a"), 7);
    assert_eq!(engine.global_int("$b"), 6);
    assert_eq!(engine.global_int("$c"), 3);
    assert_eq!(engine.global_int("$d"), 1);
    assert_eq!(engine.global_int("$e"), 5);
    assert_eq!(engine.global_int("$f"), 9);
    assert_eq!(engine.global_int("$g"), 0);
}

#[test]
fn test_string_conditions_are_numeric() {
    let (engine, _) = run(
        r#"
        .@zero$ = "0";
        .@five$ = "5";
        if (.@zero$) $a = 1; else $a = 2;
        if (.@five$) $b = 1; else $b = 2;
        $t = .@zero$ ? 3 : 4;
        $o = .@zero$ || .@five$;
        end;
    "#,
    );
    assert_eq!(engine.global_int("$a"), 2);
    assert_eq!(engine.global_int("$b"), 1);
    assert_eq!(engine.global_int("$t"), 4);
    assert_eq!(engine.global_int("$o"), 1);
}

#[test]
fn test_string_concatenation_and_comparison() {
    let (engine, _) = run(
        r#"
        $s$ = "a" + 1;
        $t$ = 1 + "a";
        $u = "abc" < "abd";
        $v = "x" == "x";
        .@name$ = "Bob";
        $greet$ = "Hi " + .@name$;
        $num$ = 5;
        end;
    "#,
    );
    assert_eq!(engine.global_str("$s$"), "a1");
    assert_eq!(engine.global_str("$t$"), "1a");
    assert_eq!(engine.global_int("$u"), 1);
    assert_eq!(engine.global_int("$v"), 1);
    assert_eq!(engine.global_str("$greet$"), "Hi Bob");
    assert_eq!(engine.global_str("$num$"), "5");
}

#[test]
fn test_type_error_ends_only_that_instance() {
    let mut engine = engine();
    let mut host = host();
    run_in(
        &mut engine,
        &mut host,
        "debugmes \"before\"; $x = \"a\" - 1; debugmes \"after\";",
    );
    run_in(&mut engine, &mut host, "debugmes \"other\"; end;");
    assert_eq!(host.debug_log, vec!["before".to_string(), "other".to_string()]);
    assert_eq!(engine.state_count(), 0);
}

#[test]
fn test_division_by_zero_ends_the_script() {
    let (_, host) = run("debugmes \"x\"; $z = 1 / 0; debugmes \"y\";");
    assert_eq!(host.debug_log, vec!["x".to_string()]);
}

#[test]
fn test_integer_limits() {
    let (engine, _) = run(
        r#"
        $min = -2147483648;
        $max = 2147483647 + 1;
        $low = $min - 1;
        $hex = 0x1F;
        $octal = 010;
        end;
    "#,
    );
    assert_eq!(engine.global_int("$min"), i32::MIN);
    assert_eq!(engine.global_int("$max"), i32::MAX);
    assert_eq!(engine.global_int("$low"), i32::MIN);
    assert_eq!(engine.global_int("$hex"), 31);
    assert_eq!(engine.global_int("$octal"), 8);
}

#[test]
fn test_for_loop_matches_goto_loop() {
    let (engine, _) = run(
        r#"
        for (.@i = 0; .@i < 5; .@i++)
            $sum += .@i;

        .@j = 0;
        L_Loop:
        if (.@j >= 5) goto L_Done;
        $sum2 += .@j;
        .@j++;
        goto L_Loop;
        L_Done:
        end;
    "#,
    );
    assert_eq!(engine.global_int("$sum"), 10);
    assert_eq!(engine.global_int("$sum2"), 10);
}

#[test]
fn test_loops_break_and_continue() {
    let (engine, _) = run(
        r#"
        for (.@i = 0; .@i < 10; .@i++) {
            if (.@i % 2) continue;
            if (.@i > 6) break;
            $evens += .@i;
        }
        while (.@k < 4) .@k++;
        $k = .@k;
        do {
            $runs++;
        } while (0);
        end;
    "#,
    );
    assert_eq!(engine.global_int("$evens"), 12);
    assert_eq!(engine.global_int("$k"), 4);
    assert_eq!(engine.global_int("$runs"), 1);
}

#[test]
fn test_switch_falls_through_until_break() {
    let source = r#"
        switch (.@v + $input) {
        case 1:
            debugmes "one";
        case 2:
            debugmes "a";
        case 3:
            debugmes "b";
            break;
        case 4:
            debugmes "c";
        default:
            debugmes "d";
        }
        end;
    "#;
    let mut engine = engine();
    let mut host = host();
    engine.set_global_int("$input", 2);
    run_in(&mut engine, &mut host, source);
    assert_eq!(host.debug_log, vec!["a".to_string(), "b".to_string()]);

    host.debug_log.clear();
    engine.set_global_int("$input", 9);
    run_in(&mut engine, &mut host, source);
    assert_eq!(host.debug_log, vec!["d".to_string()]);
}

#[test]
fn test_ternary_evaluates_both_branches() {
    let (engine, _) = run("$r = 1 ? ($x = 5) : ($y = 6); end;");
    assert_eq!(engine.global_int("$r"), 5);
    assert_eq!(engine.global_int("$x"), 5);
    assert_eq!(engine.global_int("$y"), 6);
}

#[test]
fn test_logical_operators_short_circuit() {
    let (engine, _) = run(
        r#"
        $r = 0 && ($x = 1);
        $q = 1 || ($y = 1);
        $z = 2 && 3;
        $w = 0 || "";
        end;
    "#,
    );
    assert_eq!(engine.global_int("$r"), 0);
    assert_eq!(engine.global_int("$q"), 1);
    assert_eq!(engine.global_int("$x"), 0);
    assert_eq!(engine.global_int("$y"), 0);
    assert_eq!(engine.global_int("$z"), 1);
    assert_eq!(engine.global_int("$w"), 0);
}

#[test]
fn test_arrays() {
    let (engine, _) = run(
        r#"
        setarray .@a[0], 1, 2, 3, 4, 5, 6;
        $n = getarraysize(.@a);
        $third = .@a[2];
        deletearray .@a;
        $m = getarraysize(.@a);

        .@b[5] = 1;
        $sparse = getarraysize(.@b);
        .@b[5] = 0;
        $cleared = getarraysize(.@b);

        .@s$[3] = "x";
        $ssize = getarraysize(.@s$);
        .@s$[3] = "";
        $scleared = getarraysize(.@s$);

        setarray .@c, 10, 20, 30, 40;
        deletearray .@c[1], 2;
        $c0 = .@c[0];
        $c1 = .@c[1];
        $cs = getarraysize(.@c);

        cleararray $@fill[0], 7, 3;
        $f = $@fill[0] + $@fill[1] + $@fill[2] + $@fill[3];
        end;
    "#,
    );
    assert_eq!(engine.global_int("$n"), 6);
    assert_eq!(engine.global_int("$third"), 3);
    assert_eq!(engine.global_int("$m"), 0);
    assert_eq!(engine.global_int("$sparse"), 6);
    assert_eq!(engine.global_int("$cleared"), 0);
    assert_eq!(engine.global_int("$ssize"), 4);
    assert_eq!(engine.global_int("$scleared"), 0);
    assert_eq!(engine.global_int("$c0"), 10);
    assert_eq!(engine.global_int("$c1"), 40);
    assert_eq!(engine.global_int("$cs"), 2);
    assert_eq!(engine.global_int("$f"), 21);
}

#[test]
fn test_array_index_out_of_range_ends_script() {
    let (engine, host) = run("debugmes \"x\"; .@a[128] = 1; $after = 1;");
    assert_eq!(host.debug_log, vec!["x".to_string()]);
    assert_eq!(engine.global_int("$after"), 0);
}

#[test]
fn test_callsub_gets_a_fresh_scope() {
    let (engine, _) = run(
        r#"
        .@x = 1;
        $g = 1;
        callsub L_Sub;
        $after = .@x;
        end;
    L_Sub:
        $inside = .@x;
        .@x = 99;
        $g = 2;
        return;
    "#,
    );
    assert_eq!(engine.global_int("$after"), 1);
    assert_eq!(engine.global_int("$inside"), 0);
    assert_eq!(engine.global_int("$g"), 2);
}

#[test]
fn test_user_functions() {
    let (engine, _) = run(
        r#"
        function Add {
            return getarg(0) + getarg(1);
        }
        function Bump {
            set getarg(0), getarg(0) + 1;
            return;
        }
        function Count {
            return getargcount();
        }
        function Fallback {
            return getarg(3, 42);
        }
        $sum = Add(2, 3);
        .@n = 4;
        Bump .@n;
        $n = .@n;
        $count = Count(1, 2, 3);
        $fallback = Fallback(1);
        $nested = Add(Add(1, 2), Add(3, 4));
        end;
    "#,
    );
    assert_eq!(engine.global_int("$sum"), 5);
    assert_eq!(engine.global_int("$n"), 5);
    assert_eq!(engine.global_int("$count"), 3);
    assert_eq!(engine.global_int("$fallback"), 42);
    assert_eq!(engine.global_int("$nested"), 10);
}

#[test]
fn test_declared_function_defined_later() {
    let (engine, _) = run(
        r#"
        function Later;
        $v = Later(20);
        end;
        function Later {
            return getarg(0) * 2;
        }
    "#,
    );
    assert_eq!(engine.global_int("$v"), 40);
}

#[test]
fn test_callfunc_runs_registered_script() {
    let mut engine = engine();
    let mut host = host();
    let double = engine
        .compile("return getarg(0) * 2;", "F_Double", 1)
        .unwrap();
    engine.register_function("F_Double", double);
    run_in(
        &mut engine,
        &mut host,
        "$d = callfunc(\"F_Double\", 21); $after = 1; end;",
    );
    assert_eq!(engine.global_int("$d"), 42);
    assert_eq!(engine.global_int("$after"), 1);

    run_in(&mut engine, &mut host, "callfunc \"F_Missing\"; $never = 1;");
    assert_eq!(engine.global_int("$never"), 0);
}

#[test]
fn test_return_at_top_level_ends_script() {
    let (engine, _) = run("$a = 1; return; $b = 1;");
    assert_eq!(engine.global_int("$a"), 1);
    assert_eq!(engine.global_int("$b"), 0);
}

#[test]
fn test_runaway_loop_is_terminated() {
    let (engine, host) = run("while (1) ; debugmes \"never\";");
    assert!(host.debug_log.is_empty());
    assert_eq!(engine.state_count(), 0);
}

#[test]
fn test_freeloop_lifts_the_loop_guard() {
    let (engine, _) = run(
        r#"
        freeloop(1);
        for (.@i = 0; .@i < 5000; .@i++) { }
        $done = 1;
        end;
    "#,
    );
    assert_eq!(engine.global_int("$done"), 1);

    let (engine, _) = run("for (.@i = 0; .@i < 5000; .@i++) { } $done = 1;");
    assert_eq!(engine.global_int("$done"), 0);
}

#[test]
fn test_compiling_twice_is_deterministic() {
    let source = r#"
        function F { return getarg(0) + 1; }
        for (.@i = 0; .@i < 3; .@i++) {
            switch (.@i) {
            case 0: mes "zero"; break;
            default: mes "other";
            }
        }
        $x = F(1) ? "a" : "b";
        end;
    "#;
    let first = engine().compile(source, "det", 1).unwrap();
    let second = engine().compile(source, "det", 1).unwrap();
    assert_eq!(first.code(), second.code());
}

#[test]
fn test_constants_and_parameters() {
    let mut engine = engine();
    let mut host = host();
    engine.set_constant("Job_Knight", 7);
    engine.register_parameter("Zeny", 20);
    host.set_param(PLAYER, 20, 500);
    run_in(
        &mut engine,
        &mut host,
        "$j = Job_Knight; $z = Zeny; Zeny = Zeny - 100; $t = true; end;",
    );
    assert_eq!(engine.global_int("$j"), 7);
    assert_eq!(engine.global_int("$z"), 500);
    assert_eq!(engine.global_int("$t"), 1);
    assert_eq!(host.player(PLAYER).unwrap().params.get(&20), Some(&400));
}

#[test]
fn test_player_variables_live_in_the_host() {
    let (engine, host) = run("quest_step = 3; @temp = 4; #acct = 5; ##world = 6; name$ = \"Ann\"; end;");
    assert_eq!(host.player_int(&engine, PLAYER, "quest_step"), 3);
    assert_eq!(host.player_int(&engine, PLAYER, "@temp"), 4);
    assert_eq!(host.player_int(&engine, PLAYER, "#acct"), 5);
    assert_eq!(host.player_int(&engine, PLAYER, "##world"), 6);
    assert_eq!(host.player_str(&engine, PLAYER, "name$"), "Ann");
}

#[test]
fn test_script_locals_persist_across_invocations() {
    let mut engine = engine();
    let mut host = host();
    let script = engine.compile(".count += 1; $seen = .count; end;", "counter", 1).unwrap();
    engine.invoke(&mut host, &script, 0, PLAYER, 0);
    engine.invoke(&mut host, &script, 0, PLAYER, 0);
    assert_eq!(engine.global_int("$seen"), 2);

    let count = engine.symbol(".count").unwrap();
    let locals: Vec<_> = script.locals().ints().collect();
    assert_eq!(locals, vec![(count, 0, 2)]);
}

#[test]
fn test_missing_player_falls_back_to_defaults() {
    let mut engine = engine();
    let mut host = host();
    let script = engine
        .compile("quest = 5; $q = quest + 1; mes \"hi\"; $b = 1;", "noplayer", 1)
        .unwrap();
    engine.invoke(&mut host, &script, 0, 0, 0);
    assert_eq!(engine.global_int("$q"), 1);
    assert_eq!(engine.global_int("$b"), 0);
}

#[test]
fn test_rand_stays_in_range() {
    let (engine, _) = run(
        r#"
        for (.@i = 0; .@i < 50; .@i++) {
            .@r = rand(3);
            if (.@r < 0 || .@r >= 3) $bad = 1;
            .@s = rand(5, 2);
            if (.@s < 2 || .@s > 5) $bad = 1;
        }
        $one = rand(1);
        end;
    "#,
    );
    assert_eq!(engine.global_int("$bad"), 0);
    assert_eq!(engine.global_int("$one"), 0);
}

#[test]
fn test_attachment_builtins() {
    let mut engine = engine();
    let mut host = host();
    host.add_player(2);
    run_in(
        &mut engine,
        &mut host,
        r#"
        $before = playerattached();
        detachrid;
        $detached = playerattached();
        $ok = attachrid(2);
        $now = playerattached();
        $bad = attachrid(99);
        end;
    "#,
    );
    assert_eq!(engine.global_int("$before"), 1);
    assert_eq!(engine.global_int("$detached"), 0);
    assert_eq!(engine.global_int("$ok"), 1);
    assert_eq!(engine.global_int("$now"), 2);
    assert_eq!(engine.global_int("$bad"), 0);
    assert_eq!(engine.attached_state(1), None);
    assert_eq!(engine.attached_state(2), None);
}
