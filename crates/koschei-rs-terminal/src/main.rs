use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use koschei_rs_core::resolver::{BuildResolver, RepoResolver};
use koschei_rs_core::poller::BuildPoller;
use koschei_rs_core::scheduler::Scheduler;
use koschei_rs_core::{Config, Session};

const SERVICES: [&str; 4] = ["repo-resolver", "build-resolver", "scheduler", "poller"];

#[tokio::main]
async fn main() {
	let mut opts;

	/* Parse console input */
	let parsed_options = {
		let args: Vec<String> = std::env::args().collect();

		opts = getopts::Options::new();
		opts.optflag( "h", "help",    "Show help");
		opts.optflag( "v", "verbose", "Increased verbosity");
		opts.optopt(  "c", "config",  "Config file to use instead of the default location", "CONFIG");
		opts.optflag( "",  "once",    "Run a single pass and exit");
		opts.parsing_style(getopts::ParsingStyle::FloatingFrees);

		let parsed_options = match opts.parse(&args[1..]) {
			Ok(m)  => { m }
			Err(e) => { println!("Unable to parse options: {}", e); return }
		};

		if parsed_options.opt_present("h") {
			eprintln!("{}", opts.usage(&format!("Usage: koschei-rs [options] SERVICE\n\nSERVICE is one of: {}", SERVICES.join(", "))));
			return;
		}

		parsed_options
	};

	let default_level = if parsed_options.opt_present("v") { "debug" } else { "info" };
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

	let Some(service) = parsed_options.free.first().cloned() else {
		log::error!("No service given, expected one of: {}", SERVICES.join(", "));
		return;
	};
	if !SERVICES.contains(&service.as_str()) {
		log::error!("Unknown service \"{}\", expected one of: {}", service, SERVICES.join(", "));
		return;
	}

	let config = match parsed_options.opt_str("c") {
		Some(path) => Config::load_from_file(path),
		None => Config::load_from_disk(),
	}.unwrap_or_else(|e| {
		log::warn!("Failed to read config file: {}", e);
		log::warn!("Using default config.");
		Config::default()
	});

	let stop = Arc::new(AtomicBool::new(false));
	{
		let stop = stop.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				log::info!("Interrupted, stopping after the current pass");
				stop.store(true, Ordering::SeqCst);
			}
		});
	}

	let once = parsed_options.opt_present("once");
	let result = tokio::task::spawn_blocking(move || run_service(&service, config, once, &stop)).await;
	match result {
		Ok(Ok(())) => {},
		Ok(Err(e)) => {
			log::error!("Service failed: {}", e);
			std::process::exit(1);
		},
		Err(e) => {
			log::error!("Service thread failed: {}", e);
			std::process::exit(1);
		},
	}
}

fn run_service(service: &str, config: Config, once: bool, stop: &AtomicBool) -> Result<(), Error> {
	let session = Session::new(config)?;
	let services = &session.config().services;
	let result = match service {
		"repo-resolver" => {
			let mut resolver = RepoResolver::new(&session);
			run_loop(once, services.repo_resolver_interval_secs, stop, || resolver.run())
		},
		"build-resolver" => {
			let mut resolver = BuildResolver::new(&session);
			run_loop(once, services.build_resolver_interval_secs, stop, || resolver.run())
		},
		"scheduler" => {
			let scheduler = Scheduler::new(&session);
			run_loop(once, services.scheduler_interval_secs, stop, || scheduler.run().map(|_| ()))
		},
		"poller" => {
			let poller = BuildPoller::new(&session);
			run_loop(once, services.poller_interval_secs, stop, || poller.run().map(|_| ()))
		},
		_ => Err(Error::UnknownService(service.to_string())),
	};
	session.close();
	result
}

/// Runs `pass` until stopped, pausing `interval_secs` between passes.
///
/// A transient failure of a pass is logged and retried on the next one.
fn run_loop(once: bool, interval_secs: u64, stop: &AtomicBool, mut pass: impl FnMut() -> koschei_rs_core::Result<()>) -> Result<(), Error> {
	loop {
		match pass() {
			Ok(()) => {},
			Err(e) if e.is_transient() => log::info!("Pass interrupted: {}", e),
			Err(e) => return Err(e.into()),
		}
		if once {
			return Ok(());
		}

		let deadline = Instant::now() + Duration::from_secs(interval_secs);
		while Instant::now() < deadline {
			if stop.load(Ordering::SeqCst) {
				return Ok(());
			}
			std::thread::sleep(Duration::from_millis(200));
		}
		if stop.load(Ordering::SeqCst) {
			return Ok(());
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("koschei-rs error: {0}")]
	KoscheiError(#[from] koschei_rs_core::Error),
	#[error("Unknown service {0}")]
	UnknownService(String),
}
