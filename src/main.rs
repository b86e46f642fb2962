//! Nibble Emulator - CLI Entry Point
//!
//! Commands:
//! - `nibble-emu run <image>` - Step a program image and print the registers
//! - `nibble-emu disasm <image>` - Disassemble a program image

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nibble-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "An instructional 8-bit CPU simulator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a program image and step it
    Run {
        /// Path to the raw program image (at most 128 bytes)
        image: String,
        /// Number of instructions to execute
        #[arg(short = 'n', long, default_value = "256")]
        steps: u64,
        /// Run on a worker thread for this many milliseconds instead of a fixed step count
        #[arg(long)]
        millis: Option<u64>,
        /// Patch a memory cell before running, as ADDR=VALUE (hex with 0x or h, or decimal)
        #[arg(short, long = "patch", value_parser = parse_patch)]
        patches: Vec<(u8, u8)>,
        /// Show trace output
        #[arg(short, long)]
        trace: bool,
        /// Print the final registers as JSON
        #[arg(long)]
        json: bool,
    },
    /// Disassemble a program image to readable text
    Disasm {
        /// Path to the raw program image
        image: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { image, steps, millis, patches, trace, json }) => {
            init_tracing(trace);
            run_program(&image, steps, millis, &patches, json);
        }
        Some(Commands::Disasm { image }) => {
            init_tracing(false);
            disassemble_file(&image);
        }
        None => {
            println!("Nibble Emulator v0.1.0");
            println!("An instructional 8-bit CPU simulator");
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn init_tracing(trace: bool) {
    let default = if trace { "nibble=trace" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_program(path: &str, steps: u64, millis: Option<u64>, patches: &[(u8, u8)], json: bool) {
    use nibble::{load_image, Cpu, FreeRun};

    let image = match load_image(path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    let mut cpu = match Cpu::from_image(image.bytes()) {
        Ok(cpu) => cpu,
        Err(e) => {
            eprintln!("❌ Failed to build memory: {}", e);
            std::process::exit(1);
        }
    };

    for &(addr, value) in patches {
        if let Err(e) = cpu.memory_mut().force_write(addr, value) {
            eprintln!("❌ Failed to patch {:#04x}: {}", addr, e);
            std::process::exit(1);
        }
    }

    if !json {
        println!("📂 Loaded {} bytes from {}", image.len(), path);
    }

    let (cpu, executed, error) = match millis {
        Some(ms) => {
            let run = match FreeRun::spawn(cpu, None) {
                Ok(run) => run,
                Err(e) => {
                    eprintln!("❌ Failed to start: {}", e);
                    std::process::exit(1);
                }
            };
            std::thread::sleep(std::time::Duration::from_millis(ms));
            match run.stop() {
                Ok(stopped) => (stopped.cpu, stopped.steps, stopped.error),
                Err(e) => {
                    eprintln!("❌ {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            let mut executed = 0u64;
            let mut error = None;
            while executed < steps {
                match cpu.step() {
                    Ok(_) => executed += 1,
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                }
            }
            (cpu, executed, error)
        }
    };

    if let Some(e) = error {
        eprintln!("❌ CPU error at PC={:#04x}: {}", cpu.pc(), e);
        std::process::exit(1);
    }

    let snap = cpu.snapshot();
    if json {
        match serde_json::to_string_pretty(&snap) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("❌ Failed to encode snapshot: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    println!();
    println!("━━━ Result ━━━");
    println!("Steps: {}", executed);
    println!("AX={:02X} BX={:02X} CX={:02X} DX={:02X}", snap.ax, snap.bx, snap.cx, snap.dx);
    println!("ACC={:02X} PC={:02X} CT={:02X} IR={:02X}", snap.acc, snap.pc, snap.ct, snap.ir);
    println!(
        "CF={} ZF={} SF={} PF={}",
        snap.cf as u8, snap.zf as u8, snap.sf as u8, snap.pf as u8
    );

    let dirty: Vec<_> = cpu.memory()
        .dump(0x80, 0x80)
        .into_iter()
        .filter(|&(_, v)| v != 0)
        .collect();
    if !dirty.is_empty() {
        println!();
        println!("Data cells:");
        for (addr, value) in dirty {
            println!("  {:02X}h = {:02X}", addr, value);
        }
    }
}

fn disassemble_file(path: &str) {
    use nibble::{disassemble, load_image};

    let image = match load_image(path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble(image.bytes()));
}

/// Parse `ADDR=VALUE` for `--patch`.
fn parse_patch(s: &str) -> Result<(u8, u8), String> {
    let (addr, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ADDR=VALUE, got '{}'", s))?;
    Ok((parse_byte(addr)?, parse_byte(value)?))
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_suffix('h').or_else(|| s.strip_suffix('H')) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse::<u8>()
    };
    parsed.map_err(|e| format!("invalid byte '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_patch_forms() {
        assert_eq!(parse_patch("0x10=0x70"), Ok((0x10, 0x70)));
        assert_eq!(parse_patch("80h=FFh"), Ok((0x80, 0xFF)));
        assert_eq!(parse_patch("200=7"), Ok((200, 7)));
        assert!(parse_patch("256=1").is_err());
        assert!(parse_patch("12").is_err());
    }
}
