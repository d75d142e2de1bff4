// src/main.rs
use anyhow::{bail, Context, Result};
use cyton_impedance::openbci::{BrainFlowBoard, BrainFlowBoardId};
use cyton_impedance::presenter::render_summary;
use cyton_impedance::serial::SerialCyton;
use cyton_impedance::simulator::SimulatedBoard;
use cyton_impedance::{BoardHandle, BoardLink, CancelToken, ImpedanceSequencer, MeasurementConfig};

const USAGE: &str = "usage: cyton-impedance <PORT|sim> [CONFIG.json] [--brainflow]";

struct Args {
    port: String,
    config_path: Option<String>,
    brainflow: bool,
}

fn parse_args() -> Result<Args> {
    let mut port = None;
    let mut config_path = None;
    let mut brainflow = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--brainflow" => brainflow = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            _ if port.is_none() => port = Some(arg.clone()),
            _ if config_path.is_none() => config_path = Some(arg.clone()),
            _ => bail!("unexpected argument {arg}\n{USAGE}"),
        }
    }
    let Some(port) = port else {
        let ports = SerialCyton::list_ports();
        if ports.is_empty() {
            bail!("{USAGE}\nno serial ports found; use `sim` for a simulated board");
        }
        bail!("{USAGE}\navailable serial ports: {}", ports.join(", "));
    };
    Ok(Args {
        port,
        config_path,
        brainflow,
    })
}

// 演示用仿真板卡：几种典型电极状态
fn demo_board(config: &MeasurementConfig) -> SimulatedBoard {
    let mut board = SimulatedBoard::cyton(config.channel_count, 12_000.0)
        .with_realtime(true)
        .with_mains(5.0);
    if config.channel_count >= 3 {
        board = board.with_electrode(2, Some(900_000.0)).with_electrode(3, None);
    }
    board
}

fn open_board(args: &Args, config: &MeasurementConfig) -> Result<Box<dyn BoardLink>> {
    if args.port.eq_ignore_ascii_case("sim") {
        log::info!("using simulated Cyton");
        return Ok(Box::new(demo_board(config)));
    }
    if args.brainflow {
        let board = if config.channel_count > 8 {
            BrainFlowBoardId::CytonDaisy
        } else {
            BrainFlowBoardId::Cyton
        };
        let link = BrainFlowBoard::connect(&args.port, board, config.command_timeout())?;
        log::debug!("BrainFlow board {board:?} on {}", link.port_name());
        return Ok(Box::new(link));
    }
    let link = SerialCyton::connect(&args.port, config.command_timeout())
        .with_context(|| format!("could not open Cyton on {}", args.port))?;
    log::info!("serial link open on {}", link.port_name());
    Ok(Box::new(link))
}

// 入口函数
fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;
    let mut config = match &args.config_path {
        Some(path) => MeasurementConfig::from_json_file(path)?,
        None => MeasurementConfig::default(),
    };
    config.port = args.port.clone();

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, finishing with register reset");
        on_interrupt.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let handle = BoardHandle::new(open_board(&args, &config)?);
    let started = std::time::Instant::now();
    let report = ImpedanceSequencer::new(&config, cancel)
        .run(&handle)
        .context("impedance check failed")?;
    print!("{}", render_summary(&report));
    log::info!("run took {:.1} s", started.elapsed().as_secs_f64());
    // 先释放板卡连接，exit 不会运行析构
    drop(handle);
    if report.cancelled {
        std::process::exit(130);
    }
    Ok(())
}
