//! `qbolapp` — interactive CLI front end for the link-layer engine.
//!
//! Parse flags, construct the engine, drive it from `main`, exit non-zero
//! on a fatal startup error.

mod args;
mod printer;
mod repl;

use clap::Parser;

use args::Args;
use qbolapp_engine::{Config, Engine};

fn main() {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = Config::default();
    let (engine, events) = match Engine::start(&args.interface, args.user.clone(), config) {
        Ok(started) => started,
        Err(err) => {
            eprintln!("failed to start engine on {}: {err}", args.interface);
            std::process::exit(1);
        }
    };

    log::info!("qbolapp started on {} as {} (mac {})", args.interface, args.user, engine.local_mac());

    printer::spawn(events);

    let shutdown_engine = engine.clone();
    ctrlc::set_handler(move || {
        log::info!("signal received, shutting down");
        shutdown_engine.shutdown();
        std::process::exit(0);
    })
    .expect("failed to install signal handler");

    repl::run(engine);
    std::process::exit(0);
}
