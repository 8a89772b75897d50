use hercscript::{DialogEvent, MemoryHost, Reply, ReplyKind, ScriptConfig, ScriptEngine};
use log::{debug, info};
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};

/// Player id of the console player
const CONSOLE_PLAYER: u32 = 1;

fn print_usage(program: &str) {
    println!("hercscript - run Hercules-style NPC scripts from the command line");
    println!();
    println!(
        "Usage: {} <script> [--config file.toml] [--label NAME] [--disasm]",
        program
    );
    println!("Examples:");
    println!("  {} npc/healer.txt", program);
    println!("  {} npc/healer.txt --label OnInit --disasm", program);
    println!();
    println!("Dialog is printed to stdout and replies are read from stdin.");
    println!("Set RUST_LOG=debug to trace the compiler and interpreter.");
}

struct Options {
    script_path: String,
    config_path: Option<String>,
    label: Option<String>,
    disasm: bool,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        script_path: args[1].clone(),
        config_path: None,
        label: None,
        disasm: false,
    };
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                options.config_path = Some(args.get(i).ok_or("--config needs a file name")?.clone());
            }
            "--label" => {
                i += 1;
                options.label = Some(args.get(i).ok_or("--label needs a label name")?.clone());
            }
            "--disasm" => options.disasm = true,
            other => return Err(format!("Unknown option: {}", other)),
        }
        i += 1;
    }
    Ok(options)
}

/// Print the dialog sent to the console player
fn show_dialog(host: &mut MemoryHost) {
    for event in host.take_dialog(CONSOLE_PLAYER) {
        match event {
            DialogEvent::Message(text) => println!("{}", text),
            DialogEvent::Next => println!("[next]"),
            DialogEvent::Close => println!("[close]"),
            DialogEvent::Menu(options) => {
                for (i, option) in options.iter().enumerate() {
                    if !option.is_empty() {
                        println!("  {}) {}", i + 1, option);
                    }
                }
            }
            DialogEvent::InputNumber => println!("[input a number]"),
            DialogEvent::InputText => println!("[input text]"),
        }
    }
}

fn read_line(stdin: &mut impl BufRead) -> io::Result<Option<String>> {
    print!("> ");
    io::stdout().flush()?;
    let mut line = String::new();
    if stdin.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return Ok(());
    }
    let options = parse_args(&args)?;

    let config = match &options.config_path {
        Some(path) => ScriptConfig::load(path)?,
        None => ScriptConfig::default(),
    };

    let source = match fs::read_to_string(&options.script_path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: Cannot read script '{}': {}", options.script_path, e);
            std::process::exit(1);
        }
    };

    let mut engine = ScriptEngine::new(config);
    let script = match engine.compile(&source, &options.script_path, 1) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    debug!("compiled '{}' into {} bytes", options.script_path, script.len());

    if options.disasm {
        print!("{}", engine.disassemble(&script));
    }

    let mut host = MemoryHost::new();
    host.add_player(CONSOLE_PLAYER);

    let entry = match &options.label {
        Some(label) => script
            .label(label)
            .ok_or_else(|| format!("No label '{}' in '{}'", label, options.script_path))?,
        None => 0,
    };
    info!("running '{}' from {:#x}", options.script_path, entry);
    engine.invoke(&mut host, &script, entry, CONSOLE_PLAYER, 0);

    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    loop {
        show_dialog(&mut host);
        for message in host.debug_log.drain(..) {
            println!("[debug] {}", message);
        }

        if let Some(due) = host.next_due() {
            let wait = due.saturating_sub(host.clock);
            for state in host.advance(wait) {
                engine.timer_elapsed(&mut host, state);
            }
            continue;
        }

        let Some(state) = engine.attached_state(CONSOLE_PLAYER) else {
            break;
        };
        let Some(kind) = engine.state(state).and_then(|st| st.awaiting()) else {
            break;
        };
        let Some(line) = read_line(&mut stdin)? else {
            engine.player_logout(&mut host, CONSOLE_PLAYER);
            break;
        };
        let reply = match kind {
            ReplyKind::Continue => Reply::Continue,
            ReplyKind::Menu => Reply::Menu(line.parse().unwrap_or(255)),
            ReplyKind::Number => Reply::Number(line.parse().unwrap_or(0)),
            ReplyKind::Text => Reply::Text(line),
        };
        engine.reply(&mut host, CONSOLE_PLAYER, reply);
    }

    engine.report();
    Ok(())
}
