use hercscript::{CompileErrorKind, MemoryHost, ScriptConfig, ScriptEngine};
use test_log::test;

fn engine() -> ScriptEngine {
    ScriptEngine::new(ScriptConfig::default())
}

#[test]
fn test_error_position_is_offset_by_start_line() {
    let mut engine = engine();
    let source = "mes \"hi\";\nL_A:\n    frobnicate 1;\nend;\n";
    let err = engine.compile(source, "npc/test.txt", 40).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::UnknownCommand("frobnicate".to_string()));
    assert_eq!(err.file, "npc/test.txt");
    assert_eq!(err.line, 42);
    assert_eq!(err.column, 5);

    let report = err.to_string();
    assert!(report.starts_with("script error in 'npc/test.txt' line 42 column 5: unknown command 'frobnicate'"));
    assert!(report.contains("   40: mes \"hi\";"));
    assert!(report.contains("   42:     frobnicate 1;"));
    assert!(report.contains("           ^"));
}

#[test]
fn test_lexical_errors() {
    let mut engine = engine();
    let err = engine.compile("mes \"one\ntwo\";", "t", 1).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::NewlineInString);
    assert_eq!(err.line, 1);

    let err = engine.compile("end;\n/* open", "t", 1).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::UnterminatedComment);
    assert_eq!(err.line, 2);

    let err = engine.compile("mes \"a\"", "t", 1).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::UnexpectedEnd);
}

#[test]
fn test_undefined_label_points_at_the_use() {
    let mut engine = engine();
    let err = engine
        .compile("end;\nL_Here:\n  goto L_There;\n", "t", 1)
        .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::UndefinedLabel("L_There".to_string()));
    assert_eq!(err.line, 3);
}

#[test]
fn test_structural_errors() {
    let mut engine = engine();
    let cases = [
        ("L_A:\nL_A:\nend;", CompileErrorKind::DuplicateLabel("L_A".to_string())),
        ("continue;", CompileErrorKind::ContinueOutsideLoop),
        ("case 1: end;", CompileErrorKind::CaseOutsideSwitch),
        ("Nowhere(2);", CompileErrorKind::UndefinedFunction("Nowhere".to_string())),
        (
            "function F { end; }\nfunction F { end; }",
            CompileErrorKind::DuplicateFunction("F".to_string()),
        ),
        ("mes;", CompileErrorKind::NotEnoughArguments("mes".to_string())),
    ];
    for (source, kind) in cases {
        let err = engine.compile(source, "t", 1).unwrap_err();
        assert_eq!(err.kind, kind, "source: {}", source);
    }
}

#[test]
fn test_engine_recovers_after_a_failed_compile() {
    let mut engine = engine();
    assert!(engine.compile_or_log("if (1) {", "broken", 1).is_none());

    let script = engine
        .compile_or_log("$ok = 1; end;", "fine", 1)
        .expect("compiles after an error");
    let mut host = MemoryHost::new();
    assert!(engine.invoke(&mut host, &script, 0, 0, 0).is_none());
    assert_eq!(engine.global_int("$ok"), 1);
}
