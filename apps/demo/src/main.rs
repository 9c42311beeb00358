use std::{env, path::PathBuf, process::exit, sync::Arc};

use beam_core::{
	receive_loop, DemoConfig, SessionActor, SessionEvent, SessionHandle, CONFIG_FILE_NAME,
};
use beam_discovery::{DiscoveredTarget, Mdns, TargetAdvertisement};
use clap::{Parser, Subcommand};
use tokio::{
	io::{AsyncBufReadExt, BufReader},
	sync::broadcast,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
	name = "beam-demo",
	about = "Assemble a data package, discover transfer targets on the local network, beam it over."
)]
struct Cli {
	/// Path to the config file (defaults to ./beam.json, or $BEAM_CONFIG)
	#[arg(long)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Assemble a data package and share it with a discovered target
	Share {
		/// Files to include (repeatable)
		#[arg(long = "file")]
		files: Vec<PathBuf>,
		/// Links to include (repeatable)
		#[arg(long = "link")]
		links: Vec<String>,
		/// Plain text body
		#[arg(long)]
		text: Option<String>,
		/// HTML body
		#[arg(long)]
		html: Option<String>,
		/// Custom entries as `format=value` (repeatable)
		#[arg(long = "custom", value_parser = parse_key_val)]
		custom: Vec<(String, String)>,
		/// Only surface targets of these application ids (repeatable)
		#[arg(long = "allow")]
		allow: Vec<String>,
		/// Cap on concurrently surfaced targets
		#[arg(long)]
		max_targets: Option<usize>,
		/// Package title shown to the receiver
		#[arg(long)]
		title: Option<String>,
	},
	/// Advertise this host as a transfer target and accept incoming packages
	Receive {
		/// Instance name to advertise (defaults to the configured device name)
		#[arg(long)]
		name: Option<String>,
		/// Port to listen on (0 picks a free one)
		#[arg(long, default_value_t = 0)]
		port: u16,
		/// Where accepted files land
		#[arg(long)]
		download_dir: Option<PathBuf>,
		/// Logo locator to advertise (path or http(s) URL)
		#[arg(long)]
		logo: Option<String>,
	},
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
	raw.split_once('=')
		.map(|(key, value)| (key.to_string(), value.to_string()))
		.ok_or_else(|| format!("'{raw}' is not of the form 'format=value'"))
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive("info".parse().expect("hardcoded directive parses")),
		)
		.init();

	let cli = Cli::parse();
	let config_path = cli
		.config
		.or_else(|| env::var("BEAM_CONFIG").ok().map(PathBuf::from))
		.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

	let config = match DemoConfig::load(&config_path).await {
		Ok(config) => config,
		Err(err) => {
			error!("could not load '{}': {err}", config_path.display());
			exit(1);
		}
	};

	// Feature detection: without a working mDNS daemon there is no discovery
	// capability on this host, and the rest of the demo is pointless.
	let mdns = match Mdns::new() {
		Ok(mdns) => Arc::new(mdns),
		Err(err) => {
			eprintln!("Transfer target discovery is not supported on this host: {err}");
			exit(1);
		}
	};

	match cli.command {
		Command::Share {
			files,
			links,
			text,
			html,
			custom,
			allow,
			max_targets,
			title,
		} => {
			share(
				mdns,
				config,
				files,
				links,
				text,
				html,
				custom,
				allow,
				max_targets,
				title,
			)
			.await
		}
		Command::Receive {
			name,
			port,
			download_dir,
			logo,
		} => receive(mdns, config, name, port, download_dir, logo).await,
	}
}

#[allow(clippy::too_many_arguments)]
async fn share(
	mdns: Arc<Mdns>,
	mut config: DemoConfig,
	files: Vec<PathBuf>,
	links: Vec<String>,
	text: Option<String>,
	html: Option<String>,
	custom: Vec<(String, String)>,
	allow: Vec<String>,
	max_targets: Option<usize>,
	title: Option<String>,
) {
	// CLI flags overlay the persisted form state.
	config.files.extend(files);
	config.links.extend(links);
	if let Some(text) = text {
		config.text = text;
	}
	if let Some(html) = html {
		config.html = html;
	}
	for (key, value) in custom {
		config.custom.insert(key, value);
	}
	if !allow.is_empty() {
		config.allowed_apps = allow;
	}
	if max_targets.is_some() {
		config.max_targets = max_targets;
	}
	if let Some(title) = title {
		config.title = title;
	}

	let package = config.package();
	if package.is_empty() {
		eprintln!("nothing to share; pass --file, --link, --text, --html or --custom");
		exit(1);
	}

	let handle = SessionActor::spawn(mdns, None);
	let mut events = handle.subscribe();
	if let Err(err) = handle.start(package, config.options()).await {
		error!("could not start discovery: {err}");
		exit(1);
	}

	println!("Watching for transfer targets.");
	println!("Commands: list, send <n>, logo <n>, stop, again, quit");

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	loop {
		tokio::select! {
			event = events.recv() => match event {
				Ok(event) => print_event(event),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					warn!("dropped {skipped} events, printing resumes");
				}
				Err(broadcast::error::RecvError::Closed) => break,
			},
			line = lines.next_line() => {
				let Ok(Some(line)) = line else { break };
				if !handle_line(&handle, &config, line.trim()).await {
					break;
				}
			}
		}
	}
}

async fn handle_line(handle: &SessionHandle, config: &DemoConfig, line: &str) -> bool {
	let mut parts = line.split_whitespace();
	match (parts.next(), parts.next()) {
		(None, _) | (Some("list"), _) => {
			let visible = handle.visible().await;
			if visible.is_empty() {
				println!("  (no targets yet)");
			}
			for (index, target) in visible.iter().enumerate() {
				let note = if target.metadata.enabled {
					""
				} else {
					" [disabled]"
				};
				println!("  [{index}] {} ({}){note}", target.metadata.label, target.id);
			}
		}
		(Some("send"), Some(index)) => match lookup(handle, index).await {
			Some(target) => match handle.send_to(target.id.clone()).await {
				Ok(id) => println!("transfer {id} started"),
				Err(err) => println!("transfer could not start: {err}"),
			},
			None => println!("no such target"),
		},
		(Some("logo"), Some(index)) => match lookup(handle, index).await {
			Some(target) => handle.request_logo(target.id.clone()).await,
			None => println!("no such target"),
		},
		(Some("stop"), _) => handle.stop().await,
		(Some("again"), _) => {
			handle.reconfigure().await;
			if let Err(err) = handle.start(config.package(), config.options()).await {
				println!("could not restart discovery: {err}");
			}
		}
		(Some("quit") | Some("q"), _) => return false,
		_ => println!("commands: list, send <n>, logo <n>, stop, again, quit"),
	}
	true
}

async fn lookup(handle: &SessionHandle, raw: &str) -> Option<DiscoveredTarget> {
	let index: usize = raw.parse().ok()?;
	handle.visible().await.into_iter().nth(index)
}

async fn receive(
	mdns: Arc<Mdns>,
	mut config: DemoConfig,
	name: Option<String>,
	port: u16,
	download_dir: Option<PathBuf>,
	logo: Option<String>,
) {
	if let Some(name) = name {
		config.device_name = name;
	}
	if let Some(dir) = download_dir {
		config.download_dir = dir;
	}
	if logo.is_some() {
		config.logo = logo;
	}

	let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
		Ok(listener) => listener,
		Err(err) => {
			error!("could not bind the transfer listener: {err}");
			exit(1);
		}
	};
	let addr = listener.local_addr().expect("bound listener has an address");

	let advertisement = match TargetAdvertisement::register(
		mdns.clone(),
		&config.device_name,
		config.metadata(),
		addr.port(),
	) {
		Ok(advertisement) => advertisement,
		Err(err) => {
			error!("could not advertise this host: {err}");
			exit(1);
		}
	};
	info!(
		"advertising '{}' on port {}, saving into '{}'",
		advertisement.instance(),
		addr.port(),
		config.download_dir.display()
	);

	let (events_tx, mut events_rx) = broadcast::channel(64);
	tokio::spawn({
		let download_dir = config.download_dir.clone();
		async move {
			if let Err(err) = receive_loop(listener, download_dir, events_tx).await {
				error!("receive loop failed: {err}");
			}
		}
	});

	loop {
		tokio::select! {
			event = events_rx.recv() => match event {
				Ok(event) => print_event(event),
				Err(broadcast::error::RecvError::Lagged(_)) => {}
				Err(broadcast::error::RecvError::Closed) => break,
			},
			result = tokio::signal::ctrl_c() => {
				if let Err(err) = result {
					warn!("ctrl-c handler failed: {err}");
				}
				break;
			}
		}
	}

	// Withdraw the mDNS record before exiting so watchers see a remove event.
	drop(advertisement);
	mdns.shutdown();
}

fn print_event(event: SessionEvent) {
	match event {
		SessionEvent::StateChanged { state } => println!("state: {state:?}"),
		SessionEvent::TargetAdded { target } => {
			println!("+ {} ({})", target.metadata.label, target.id)
		}
		SessionEvent::TargetRemoved { id } => println!("- {id}"),
		SessionEvent::EntryChanged { id, change } => println!("~ {id}: {change:?} changed"),
		SessionEvent::ListCleared => println!("(list cleared)"),
		SessionEvent::TransferStarted { id, target } => {
			println!("transfer {id} to '{target}' started")
		}
		SessionEvent::TransferProgress { id, percent } => println!("transfer {id}: {percent}%"),
		SessionEvent::TransferCompleted { id } => println!("transfer {id} completed"),
		SessionEvent::TransferFailed { id, reason } => println!("transfer {id} failed: {reason}"),
		SessionEvent::IncomingTransfer {
			id,
			from,
			title,
			files,
		} => {
			let title = if title.is_empty() {
				"(untitled)".to_string()
			} else {
				title
			};
			println!(
				"incoming {id} from {from}: '{title}' with {} file(s)",
				files.len()
			);
		}
		SessionEvent::IncomingCompleted { id } => println!("incoming {id} saved"),
		SessionEvent::IncomingFailed { id, reason } => println!("incoming {id} failed: {reason}"),
	}
}
