use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser};

use hawk_emu::console::{self, Console, RawModeGuard};
use hawk_emu::err::report;
use hawk_emu::load::Loader;
use hawk_emu::sim::device::KeySource;
use hawk_emu::sim::{SimFlags, Simulator, DEFAULT_RECYCLE};

/// Runs SMAL32 object files on an emulated Hawk machine.
#[derive(Debug, Parser)]
#[command(name = "hawk", disable_help_flag = true, override_usage = "hawk [-Z cycles] load file list")]
struct Args {
    /// Memory cycles between display refreshes while running.
    #[arg(short = 'Z', value_name = "cycles", default_value_t = DEFAULT_RECYCLE)]
    recycle: u32,

    /// Print usage.
    #[arg(short = '?', action = ArgAction::Help)]
    help: Option<bool>,

    /// Object files, loaded in order.
    files: Vec<PathBuf>,
}

fn run(args: Args) -> anyhow::Result<()> {
    let flags = SimFlags { recycle: args.recycle, ..Default::default() };
    let mut sim = Simulator::new(flags).map_err(|e| anyhow!(report(&e)))?;

    let mut loader = Loader::new();
    for path in &args.files {
        let src = std::fs::read(path)
            .with_context(|| format!("{}: cannot open object file", path.display()))?;
        loader.load(&mut sim.bus.mem, &src)
            .map_err(|e| anyhow!("{}: {}", path.display(), report(&e)))?;
    }
    sim.breakpoint = loader.start().unwrap_or(0);

    let keys = console::spawn_input().context("cannot read standard input")?;
    sim.attach_keyboard(KeySource::Channel(keys.clone()))?;
    let display = sim.attach_display()?;

    console::install_pause_handler(Arc::clone(sim.pause_flag()))
        .context("cannot install the interrupt handler")?;

    let raw = match RawModeGuard::new() {
        Ok(guard) => Some(guard),
        Err(e) => {
            log::warn!("terminal left in line mode: {e}");
            None
        }
    };
    let mut con = Console::new(keys, io::stdout(), Some(display));
    sim.run(&mut con);
    drop(raw);

    log::info!("{} instructions executed", sim.instructions_run);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    // exits with success on -?, and with a usage error on bad arguments
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hawk: {e:#}");
            ExitCode::FAILURE
        }
    }
}
