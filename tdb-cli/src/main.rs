//! tdb CLI - コマンドラインインターフェース
//!
//! ptrace ベースの最小限のデバッガ tdb のREPLインターフェース

use anyhow::Result;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tdb_core::{
    Command, CommandOutput, ExecutionController, SessionConfig, StopReason, TraceSession,
    DEFAULT_MAX_BREAKPOINTS,
};
use tdb_target::{Process, Tracer};
use tracing_subscriber::EnvFilter;

/// tdb - minimal ptrace debugger
#[derive(Parser)]
#[command(name = "tdb")]
#[command(version)]
#[command(about = "Minimal breakpoint debugger for a single traced process", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: DebugCommand,

    /// Maximum number of breakpoints held at once
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_BREAKPOINTS)]
    max_breakpoints: usize,

    /// Base address for relative addresses (default: start of the [stack] mapping)
    #[arg(long, global = true, value_parser = parse_base_address)]
    base_address: Option<u64>,

    /// Log filter, e.g. "debug" or "tdb_core=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Launch and debug an executable
    Run {
        /// Path to the executable binary
        binary: String,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Attach to an existing process
    Attach {
        /// Path to the executable binary
        binary: String,

        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,
    },
}

fn parse_base_address(s: &str) -> Result<u64, String> {
    tdb_core::parse::parse_address(s).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = SessionConfig {
        max_breakpoints: cli.max_breakpoints,
    };
    let mut controller = init_session(cli.command, cli.base_address, config)?;
    run_repl(&mut controller)?;

    // ブレークポイントを元に戻してからデタッチする
    let process = controller.end();
    drop(process);
    Ok(())
}

/// tracing-subscriberを初期化する
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// プロセスを起動またはアタッチしてセッションを作成する
fn init_session(
    command: DebugCommand,
    base_address: Option<u64>,
    config: SessionConfig,
) -> Result<ExecutionController<Process>> {
    let (process, binary) = match command {
        DebugCommand::Run { binary, args } => {
            let process = Process::spawn(&binary, &args)?;
            println!("Process {} spawned and stopped at first instruction", process.pid());
            (process, binary)
        }
        DebugCommand::Attach { binary, pid } => {
            let process = Process::attach(pid)?;
            println!("Attached to process {}", pid);
            (process, binary)
        }
    };

    let base_address = base_address.unwrap_or_else(|| match process.memory().stack_base() {
        Ok(base) => base,
        Err(e) => {
            tracing::warn!(error = %e, "could not resolve stack base address, using 0");
            0
        }
    });
    println!("Base address = 0x{:x}", base_address);

    let session = TraceSession::new(process, binary, base_address, config)?;
    Ok(ExecutionController::new(session))
}

/// REPLループを実行する
fn run_repl(controller: &mut ExecutionController<Process>) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(tdb) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match Command::from_line(line).and_then(|cmd| cmd.execute(controller)) {
                    Ok(CommandOutput::Quit) => break,
                    Ok(output) => print_output(output),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn print_output(output: CommandOutput) {
    match output {
        CommandOutput::Stopped(stop) => print_stop(stop),
        CommandOutput::BreakpointSet { id, address } => {
            println!("Breakpoint {} set at 0x{:x}", id, address);
        }
        CommandOutput::Registers(values) => {
            for (reg, value) in values {
                match value {
                    Ok(value) => println!("{:<10} 0x{:x}", reg.name(), value),
                    Err(_) => println!("{:<10} ERROR", reg.name()),
                }
            }
        }
        CommandOutput::Value(value) => println!("0x{:x}", value),
        CommandOutput::Written => {}
        CommandOutput::Help => print_help(),
        CommandOutput::Quit => {}
    }
}

fn print_stop(stop: StopReason) {
    match stop {
        StopReason::Breakpoint => println!("Breakpoint hit"),
        StopReason::Step => println!("Stepped"),
        StopReason::Signal(signal) => println!("Received signal: {:?}", signal),
        StopReason::Exited(code) => println!("Process exited with code {}", code),
        StopReason::Killed(signal) => println!("Process killed by signal {:?}", signal),
        StopReason::Other => println!("Process stopped (unknown reason)"),
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help (h, ?)                      - Show this help message");
    println!("  quit (q, exit)                   - Exit the debugger");
    println!();
    println!("Debug commands:");
    println!("  continue (c, cont)               - Continue execution");
    println!("  break (b, bp) <addr>             - Set breakpoint at base + addr");
    println!("  register (r, reg) dump           - Show all registers");
    println!("  register read <name>             - Show one register");
    println!("  register write <name> <value>    - Set one register");
    println!("  memory (m, mem) read <addr>      - Read 8 bytes at base + addr");
    println!("  memory write <addr> <value>      - Write 8 bytes at base + addr");
    println!();
    println!("Numbers are decimal unless prefixed with 0x or containing hex digits.");
    println!();
    println!("Examples:");
    println!("  break 0x1234");
    println!("  register read rip");
    println!("  memory write 20 ff");
}
