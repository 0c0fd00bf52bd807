use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use thorn_bytecode::disasm::disassemble;
use thorn_vm::binary_chunk::load_chunks;
use thorn_vm::{Runtime, RuntimeConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "thorn", about = "Run and inspect precompiled Thorn bytecode chunks", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute every chunk in a file and print the results of the last one
    Run {
        file: PathBuf,
        /// TOML file with runtime limits
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        max_instructions: Option<u64>,
        #[arg(long)]
        max_call_depth: Option<usize>,
        /// Start with an empty global environment
        #[arg(long)]
        no_stdlib: bool,
    },
    /// Print a listing of every chunk in a file
    Disasm { file: PathBuf },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("THORN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_file(path: &Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("thorn: cannot read {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> RuntimeConfig {
    let Some(path) = path else {
        return RuntimeConfig::default();
    };
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("thorn: cannot read {}: {e}", path.display());
            process::exit(1);
        }
    };
    match toml::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("thorn: bad config {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn chunk_name(path: &Path) -> String {
    format!("@{}", path.display())
}

fn run(file: &Path, mut config: RuntimeConfig, overrides: (Option<u64>, Option<usize>)) {
    if let Some(n) = overrides.0 {
        config.max_instructions = n;
    }
    if let Some(n) = overrides.1 {
        config.max_call_depth = n;
    }
    tracing::debug!(?config, file = %file.display(), "starting runtime");

    let data = read_file(file);
    let mut rt = Runtime::with_config(config);
    rt.set_output(|s| print!("{s}"));

    match rt.do_stream(&data, &chunk_name(file)) {
        Ok(exec) => {
            for v in &exec.values {
                println!("{}", rt.tostring(*v));
            }
        }
        Err(e) => {
            eprintln!("thorn: {e}");
            process::exit(1);
        }
    }
}

fn disasm(file: &Path) {
    let data = read_file(file);
    match load_chunks(&data, &chunk_name(file)) {
        Ok(protos) => {
            for proto in &protos {
                print!("{}", disassemble(proto));
            }
        }
        Err(e) => {
            eprintln!("thorn: {e}");
            process::exit(1);
        }
    }
}

fn main() {
    init_logging();
    let args = Args::parse();
    match args.command {
        Command::Run {
            file,
            config,
            max_instructions,
            max_call_depth,
            no_stdlib,
        } => {
            let mut cfg = load_config(config.as_deref());
            if no_stdlib {
                cfg.stdlib = false;
            }
            run(&file, cfg, (max_instructions, max_call_depth));
        }
        Command::Disasm { file } => disasm(&file),
    }
}
