//! vfa - interactive archive browser

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vfsarc::config::Config;
use vfsarc::shell::{self, Command, StdinPrompt};
use vfsarc::Navigator;

/// RUST_LOG wins over the configured level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let config = Config::load();
    init_logging(&config.general.log_level);
    info!("Starting vfa");

    let mut nav = match Navigator::from_config(&config) {
        Ok(nav) => nav,
        Err(e) => {
            eprintln!("vfa: {}", e);
            std::process::exit(1);
        }
    };
    let mut prompt = StdinPrompt;
    let mut stdout = io::stdout();

    if let Some(path) = std::env::args_os().nth(1) {
        run_one(&mut nav, Command::Open(PathBuf::from(path)), &mut prompt, &mut stdout);
    } else {
        println!("Type 'help' for commands.");
    }

    let stdin = io::stdin();
    loop {
        let label = nav.status_line();
        print!("{}> ", if label.is_empty() { "vfa" } else { &label });
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        match Command::parse(&line) {
            Ok(Some(cmd)) => {
                if !run_one(&mut nav, cmd, &mut prompt, &mut stdout) {
                    break;
                }
            }
            Ok(None) => {}
            Err(msg) => eprintln!("{}", msg),
        }
    }
}

/// Execute and report errors; returns `false` on quit
fn run_one(nav: &mut Navigator, cmd: Command, prompt: &mut StdinPrompt, out: &mut io::Stdout) -> bool {
    match shell::execute(nav, cmd, prompt, out) {
        Ok(keep_going) => keep_going,
        Err(e) => {
            eprintln!("error: {}", e);
            true
        }
    }
}
