//! Thin CLI wrapper around `exprtc`. The real command-line surface (flag
//! parsing beyond what's needed to exercise the library, physical catalog
//! file loading, C header emission) is an external collaborator per the
//! spec; this binary exists to drive the library end to end and to host
//! the `--test` self-test switch.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{App, Arg};

use exprtc::catalog::{OpcodeCatalog, OperatorCatalog};
use exprtc::config::Config;
use exprtc::driver::CompileUnit;
use exprtc::output::build_output;

fn main() {
    env_logger::init();

    let matches = App::new("exprtc")
        .about("Compiles MoarVM JIT expression templates")
        .arg(
            Arg::with_name("input")
                .help("input template file; stdin if omitted")
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .help("output file; stdout if omitted"),
        )
        .arg(
            Arg::with_name("prefix")
                .long("prefix")
                .takes_value(true)
                .default_value("MVM_JIT_"),
        )
        .arg(
            Arg::with_name("no-include")
                .long("no-include")
                .help("reject `include:` forms"),
        )
        .arg(
            Arg::with_name("opcodes")
                .long("opcodes")
                .takes_value(true)
                .help("path to a JSON opcode catalog fixture"),
        )
        .arg(
            Arg::with_name("operators")
                .long("operators")
                .takes_value(true)
                .help("path to a JSON expression-operator catalog fixture"),
        )
        .arg(Arg::with_name("test").long("test").help("run self-tests and exit"))
        .get_matches();

    if matches.is_present("test") {
        process::exit(run_self_test());
    }

    let config = Config {
        prefix: matches.value_of("prefix").unwrap_or("MVM_JIT_").to_string(),
        input: matches.value_of("input").map(PathBuf::from),
        output: matches.value_of("output").map(PathBuf::from),
        include: !matches.is_present("no-include"),
        test: false,
    };

    let opcodes = match load_catalog::<OpcodeCatalog>(matches.value_of("opcodes")) {
        Ok(c) => c,
        Err(e) => fail(&config, &e),
    };
    let operators = match load_catalog::<OperatorCatalog>(matches.value_of("operators")) {
        Ok(c) => c,
        Err(e) => fail(&config, &e),
    };

    if let Err(e) = run(&config, &opcodes, &operators) {
        fail(&config, &e);
    }
}

fn load_catalog<T: CatalogFromJson>(path: Option<&str>) -> Result<T, String> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p).map_err(|e| e.to_string())?;
            T::from_json(&text).map_err(|e| e.to_string())
        }
        None => Ok(T::default()),
    }
}

trait CatalogFromJson: Default {
    fn from_json(text: &str) -> serde_json::Result<Self>
    where
        Self: Sized;
}

impl CatalogFromJson for OpcodeCatalog {
    fn from_json(text: &str) -> serde_json::Result<Self> {
        OpcodeCatalog::from_json(text)
    }
}

impl CatalogFromJson for OperatorCatalog {
    fn from_json(text: &str) -> serde_json::Result<Self> {
        OperatorCatalog::from_json(text)
    }
}

fn run(config: &Config, opcodes: &OpcodeCatalog, operators: &OperatorCatalog) -> Result<(), String> {
    let source = match &config.input {
        Some(path) => fs::read_to_string(path).map_err(|e| e.to_string())?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .expect("failed to read stdin");
            buf
        }
    };

    let input_path = config
        .input
        .clone()
        .unwrap_or_else(|| PathBuf::from("<stdin>"));

    let mut unit = CompileUnit::new(opcodes, operators, &config.prefix);
    unit.set_allow_include(config.include);
    let file_unit = unit
        .compile_source(&source, &input_path)
        .map_err(|e| e.to_string())?;
    let output = build_output(opcodes, &file_unit, &unit.constants);
    let json = serde_json::to_string_pretty(&output).expect("output is always serializable");

    match &config.output {
        Some(path) => fs::write(path, json).map_err(|e| e.to_string())?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(json.as_bytes()).expect("failed to write stdout");
        }
    }
    Ok(())
}

fn fail(config: &Config, message: &str) -> ! {
    eprintln!("exprtc: error: {}", message);
    if let Some(path) = &config.output {
        let _ = fs::remove_file(path);
    }
    process::exit(1);
}

/// Runs the §8 self-tests: the library's own unit test suite is the real
/// source of truth, but `--test` additionally re-checks scenarios 1-3 end
/// to end against a tiny fixture catalog, so that a build without `cargo
/// test` available can still sanity-check itself. Scenario 4's structural
/// invariants (children-before-parents, `l < p`) are already covered by
/// `compile.rs`'s own unit tests, so they aren't repeated here.
fn run_self_test() -> i32 {
    let opcodes_json = r#"[
        {"name": "load", "operands": [
            {"direction": "write", "type_tag": "pargs"},
            {"direction": "read", "type_tag": "pargs"}
        ]},
        {"name": "store", "operands": [
            {"direction": "write", "type_tag": "pargs"},
            {"direction": "read", "type_tag": "pargs"}
        ]}
    ]"#;
    let operators_json = r#"[
        {"name": "copy", "operand_count": 1, "param_count": 0},
        {"name": "load", "operand_count": 1, "param_count": 0},
        {"name": "add", "operand_count": 2, "param_count": 0},
        {"name": "sub", "operand_count": 2, "param_count": 0},
        {"name": "const", "operand_count": 2, "param_count": 0},
        {"name": "addr", "operand_count": 2, "param_count": 0},
        {"name": "discard", "operand_count": 1, "param_count": 0},
        {"name": "do", "operand_count": 2, "param_count": 0},
        {"name": "dov", "operand_count": 2, "param_count": 0}
    ]"#;

    let opcodes = OpcodeCatalog::from_json(opcodes_json).expect("fixture catalog is valid json");
    let operators =
        OperatorCatalog::from_json(operators_json).expect("fixture catalog is valid json");

    let scenario_1 = "(let: (($foo (copy $1))) (load $foo 8))";
    let scenario_2 = "(let: (($foo (const 1 1)) ($bar (add $foo $foo))) \
                       (let: (($foo (sub $bar (const 1 1)))) (copy $foo)))";
    // A macro body with its own `let:` scope (spec section 8 scenario 3):
    // registration must link the body before storing it, so the call site
    // only ever has to substitute `,foo` and share structure.
    let scenario_3_macro = "(macro: foo (,foo) (let: (($obj (addr ,foo 8))) (add ,foo $obj)))";
    let scenario_3_template = "(template: load (let: (($obj (copy $1))) (^foo $obj)))";

    for (name, src) in [("scenario_1", scenario_1), ("scenario_2", scenario_2)] {
        let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
        let form = format!("(template: load {})", src);
        match unit.compile_source(&form, &PathBuf::from("<self-test>")) {
            Ok(_) => println!("{}: ok", name),
            Err(e) => {
                eprintln!("{}: FAILED: {}", name, e);
                return 1;
            }
        }
    }

    let mut unit = CompileUnit::new(&opcodes, &operators, "MVM_JIT_");
    let form = format!("{}\n{}", scenario_3_macro, scenario_3_template);
    match unit.compile_source(&form, &PathBuf::from("<self-test>")) {
        Ok(_) => println!("scenario_3: ok"),
        Err(e) => {
            eprintln!("scenario_3: FAILED: {}", e);
            return 1;
        }
    }
    0
}
