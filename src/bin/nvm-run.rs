//! nvm-run - assemble and run a program on a freshly built machine
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration
//! nvm-run program.nvm
//!
//! # Seed registers and print the machine state after every instruction
//! nvm-run -v --set r0=A --set r1=B program.nvm
//!
//! # Custom configuration, step limit, and a JSON dump of the weights
//! nvm-run --config nvm.json --max-steps 500 --dump weights.json program.nvm
//! ```
//!
//! # Exit Codes
//!
//! - 0: Program reached `exit`
//! - 1: Program stalled or hit the step limit
//! - 2: Invalid arguments, IO error or build error

use std::path::Path;
use std::process::ExitCode;

use nvm::vm::StepOutcome;
use nvm::{artifact, Machine, NvmConfig};

const DEFAULT_MAX_STEPS: usize = 1000;

struct Options {
    verbose: bool,
    config: Option<String>,
    registers: Vec<(String, String)>,
    max_steps: usize,
    dump: Option<String>,
    program: String,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {}\n", message);
            print_help();
            return ExitCode::from(2);
        }
    };

    let config = match &options.config {
        Some(path) => match NvmConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config {}: {}", path, e);
                return ExitCode::from(2);
            }
        },
        None => NvmConfig::default(),
    };

    let path = Path::new(&options.program);
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            return ExitCode::from(2);
        }
    };
    let name = program_name(path);

    let mut machine = match Machine::new(config) {
        Ok(machine) => machine,
        Err(e) => {
            eprintln!("Error building machine: {}", e);
            return ExitCode::from(2);
        }
    };
    match machine.assemble(&source, &name) {
        Ok(errors) if errors > 0 => eprintln!("warning: {} recall errors in {}", errors, name),
        Ok(_) => {}
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            return ExitCode::from(2);
        }
    }
    if let Err(e) = machine.load(&name, &options.registers) {
        eprintln!("Error loading {}: {}", name, e);
        return ExitCode::from(2);
    }

    if options.verbose {
        println!(
            "{} layers, {} pathways, {} build errors",
            machine.network().layers().len(),
            machine.weights().len(),
            machine.build_errors()
        );
    }

    let code = execute(&mut machine, options.max_steps, options.verbose);

    if let Some(dump) = &options.dump {
        if let Err(e) = artifact::save_to_file(machine.network(), machine.weights(), dump) {
            eprintln!("Error writing {}: {}", dump, e);
            return ExitCode::from(2);
        }
    }
    code
}

fn execute(machine: &mut Machine, max_steps: usize, verbose: bool) -> ExitCode {
    let max_ticks = machine.config().max_ticks;
    for steps in 1..=max_steps {
        match machine.step(max_ticks) {
            StepOutcome::Exited { .. } => {
                println!("exited after {} steps", steps);
                print_registers(machine);
                return ExitCode::SUCCESS;
            }
            StepOutcome::Stalled { ticks } => {
                eprintln!("stalled at step {} after {} ticks", steps, ticks);
                eprintln!("  {}", machine.state_string());
                return ExitCode::FAILURE;
            }
            StepOutcome::Completed { ticks } => {
                if verbose {
                    println!("[{:>4}] {:>3} ticks  {}", steps, ticks, machine.state_string());
                }
            }
        }
    }
    eprintln!("step limit {} reached", max_steps);
    print_registers(machine);
    ExitCode::FAILURE
}

fn print_registers(machine: &Machine) {
    for name in machine.network().register_names() {
        let token = machine.decode(&name).unwrap_or("?");
        println!("  {} = {}", name, token);
    }
}

fn parse_args(args: &[String]) -> Result<Option<Options>, String> {
    let mut options = Options {
        verbose: false,
        config: None,
        registers: Vec::new(),
        max_steps: DEFAULT_MAX_STEPS,
        dump: None,
        program: String::new(),
    };
    let mut program = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => options.verbose = true,
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "--config" => options.config = Some(value(&mut iter, arg)?),
            "--dump" => options.dump = Some(value(&mut iter, arg)?),
            "--max-steps" => {
                let raw = value(&mut iter, arg)?;
                options.max_steps = raw
                    .parse()
                    .map_err(|_| format!("--max-steps expects a number, got {}", raw))?;
            }
            "--set" => {
                let raw = value(&mut iter, arg)?;
                let (register, token) = raw
                    .split_once('=')
                    .ok_or_else(|| format!("--set expects REG=TOKEN, got {}", raw))?;
                options.registers.push((register.to_string(), token.to_string()));
            }
            _ if arg.starts_with('-') => return Err(format!("Unknown option: {}", arg)),
            _ if program.is_some() => return Err(format!("Unexpected argument: {}", arg)),
            _ => program = Some(arg.clone()),
        }
    }

    options.program = program.ok_or("No program specified")?;
    Ok(Some(options))
}

/// File stem with characters that program names cannot hold replaced by `_`
fn program_name(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("main");
    let name: String = stem
        .chars()
        .map(|ch| if ch == '.' || ch == ':' || ch.is_whitespace() { '_' } else { ch })
        .collect();
    if name.is_empty() {
        "main".to_string()
    } else {
        name
    }
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String, String> {
    iter.next()
        .cloned()
        .ok_or_else(|| format!("{} expects a value", flag))
}

fn print_help() {
    eprintln!(
        r#"nvm-run - run a program on the neural virtual machine

USAGE:
    nvm-run [OPTIONS] <PROGRAM>

OPTIONS:
    -v, --verbose         Print the machine state after every instruction
    --config <FILE>       JSON configuration (defaults otherwise)
    --set <REG=TOKEN>     Initial register value, repeatable
    --max-steps <N>       Instruction limit (default {})
    --dump <FILE>         Write the final weights as JSON
    -h, --help            Show this help

EXIT CODES:
    0  program exited
    1  program stalled or hit the step limit
    2  invalid arguments, IO or build error"#,
        DEFAULT_MAX_STEPS
    );
}
