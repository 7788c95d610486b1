use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Parser as ClapParser;

use hive::{Bridge, BridgeCreateInfo, HostModule, HostValue, Position, SwarmHub};

const HOST_MODULE: &str = "hive";

/// Run a compiled swarm script on a group of agents
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Compiled script image
    #[arg(help = "The bytecode file to run")]
    bytecode: PathBuf,

    /// Debug-symbol table produced alongside the bytecode
    #[arg(help = "The debug-symbol file for the bytecode")]
    debug: PathBuf,

    /// Number of agents, each running its own VM
    #[arg(long, default_value_t = 3)]
    agents: u16,

    /// Number of ticks to run
    #[arg(long, default_value_t = 10)]
    ticks: u32,

    /// Agents closer than this see each other as neighbors
    #[arg(long, default_value_t = 10.0)]
    neighbor_distance: f32,

    /// Distance between neighboring agents on the starting line
    #[arg(long, default_value_t = 5.0)]
    spacing: f32,
}

/// Host functions every script can reach: `clock()` returns the seconds
/// since start-up.
fn host_module(started: Instant) -> HostModule {
    HostModule::new(HOST_MODULE)
        .function(hive::INIT_FUNCTION, |_| {
            log::info!("host module ready");
            Ok(HostValue::None)
        })
        .function("clock", move |_| {
            Ok(HostValue::Float(started.elapsed().as_secs_f64()))
        })
}

fn setup(cli: &Cli, bridge: &mut Bridge, hub: &mut SwarmHub) -> Result<(), Box<dyn Error>> {
    bridge.install_module(host_module(Instant::now()));
    bridge.import_module(HOST_MODULE)?;
    bridge.register_init()?;

    for id in 0..cli.agents {
        let vm = bridge.load(&cli.bytecode, &cli.debug, id)?;
        bridge.register_hook(vm, 0, "clock")?;
        hub.add_agent(vm, id, Position::new(id as f32 * cli.spacing, 0.0, 0.0));
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut bridge = Bridge::new(BridgeCreateInfo::default());
    if cli.agents as usize > bridge.max_vms() {
        log::error!("at most {} agents are supported", bridge.max_vms());
        process::exit(2);
    }
    let mut hub = SwarmHub::new(cli.neighbor_distance);
    if let Err(err) = setup(&cli, &mut bridge, &mut hub) {
        log::error!("{err}");
        bridge.destroy_all();
        process::exit(1);
    }

    for tick in 0..cli.ticks {
        let report = match hub.tick(&mut bridge) {
            Ok(report) => report,
            Err(err) => {
                log::error!("tick {tick}: {err}");
                break;
            }
        };
        log::info!(
            "tick {tick}: {} stepped, {} faulted, {} messages routed",
            report.stepped,
            report.faulted,
            report.routed
        );
        if report.stepped == 0 {
            log::warn!("every agent has faulted, stopping");
            break;
        }
    }

    let failures = bridge.destroy_all();
    if !failures.is_empty() {
        process::exit(1);
    }
}
