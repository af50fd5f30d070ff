use std::{error::Error, sync::Arc, sync::mpsc, thread};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dbvisor::{
    cli::{Cli, Commands, parse_args},
    config::{load_descriptors, load_settings},
    logs::LogSink,
    materialize::ConfigMaterializer,
    registry::{Direction, ServiceRegistry, ServiceState, ServiceStatus, Toggle},
    runtime::InstallRoot,
    supervisor::ServiceSupervisor,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let root = match &args.root {
        Some(path) => InstallRoot::new(path),
        None => InstallRoot::from_current_exe(),
    };
    let log = Arc::new(LogSink::new(root.log_dir()));

    match args.command {
        Commands::Init => {
            let descriptors = load_descriptors(&root)?;
            root.prepare(&descriptors)?;
            let materializer = ConfigMaterializer::new(root.clone(), Arc::clone(&log));
            for descriptor in &descriptors {
                match materializer.ensure(descriptor)? {
                    Some(path) => println!("{}: generated {}", descriptor.name, path.display()),
                    None => println!("{}: config present", descriptor.name),
                }
            }
            if descriptors.is_empty() {
                warn!("No descriptors found in {}", root.config_dir().display());
            }
        }
        Commands::Status { service, json } => {
            let registry = build_registry(root, log)?;
            let statuses = match service {
                Some(name) => {
                    let name = resolve_service(&registry, &name)?;
                    vec![registry.status(&name)?]
                }
                None => registry.statuses()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                print_statuses(&statuses);
            }
        }
        Commands::Start { service } => {
            let registry = build_registry(root, log)?;
            let name = resolve_service(&registry, &service)?;
            run_operation(&registry, &name, Some(Direction::Starting))?;
        }
        Commands::Stop { service } => {
            let registry = build_registry(root, log)?;
            let name = resolve_service(&registry, &service)?;
            run_operation(&registry, &name, Some(Direction::Stopping))?;
        }
        Commands::Toggle { service } => {
            let registry = build_registry(root, log)?;
            let name = resolve_service(&registry, &service)?;
            run_operation(&registry, &name, None)?;
        }
        Commands::Run => {
            let descriptors = load_descriptors(&root)?;
            root.prepare(&descriptors)?;
            let registry = build_registry(root, log)?;
            run_foreground(&registry)?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_registry(root: InstallRoot, log: Arc<LogSink>) -> Result<ServiceRegistry, Box<dyn Error>> {
    let settings = load_settings(&root)?;
    let supervisor = ServiceSupervisor::system(root, settings, log);
    Ok(ServiceRegistry::load(supervisor)?)
}

/// Accepts either a service name or an engine kind, case-insensitively.
fn resolve_service(registry: &ServiceRegistry, requested: &str) -> Result<String, Box<dyn Error>> {
    for name in registry.service_names() {
        if name.eq_ignore_ascii_case(requested) {
            return Ok(name.clone());
        }
    }
    for name in registry.service_names() {
        let descriptor = registry.descriptor(name)?;
        if descriptor.kind.as_ref().eq_ignore_ascii_case(requested) {
            return Ok(name.clone());
        }
    }
    Err(format!("Unknown service '{requested}'").into())
}

/// Toggles `name` and waits for the result. With `wanted` set, a service already past that
/// operation is left alone.
fn run_operation(
    registry: &ServiceRegistry,
    name: &str,
    wanted: Option<Direction>,
) -> Result<(), Box<dyn Error>> {
    let state = registry.query_state(name)?;
    if let Some(wanted) = wanted
        && state.next_operation() != Some(wanted)
    {
        println!("{name}: already {state}");
        return Ok(());
    }

    let operation = match registry.toggle(name)? {
        Toggle::Dispatched(operation) => operation,
        Toggle::Ignored => {
            println!("{name}: {state}, request ignored");
            return Ok(());
        }
    };

    let direction = operation.direction();
    if operation.wait() {
        let state = registry.query_state(name)?;
        println!("{name}: {state}");
        return Ok(());
    }

    let status = registry.status(name)?;
    let verb = match direction {
        Direction::Starting => "start",
        Direction::Stopping => "stop",
    };
    error!(
        "Failed to {verb} '{name}': {}",
        status.detail.as_deref().unwrap_or("unknown error")
    );
    std::process::exit(1);
}

fn run_foreground(registry: &ServiceRegistry) -> Result<(), Box<dyn Error>> {
    let events = registry.subscribe()?;
    thread::Builder::new()
        .name("dbv-events".into())
        .spawn(move || {
            for change in events {
                match change.detail {
                    Some(detail) => warn!("{} -> {} ({detail})", change.service, change.state),
                    None => info!("{} -> {}", change.service, change.state),
                }
            }
        })?;

    for name in registry.service_names() {
        if matches!(registry.query_state(name)?, ServiceState::Stopped) {
            registry.toggle(name)?;
        }
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    info!("Supervising {} service(s); press Ctrl-C to stop", registry.service_names().len());
    let _ = rx.recv();

    info!("Shutting down running services");
    for operation in registry.shutdown_all() {
        let service = operation.service().to_string();
        if !operation.wait() {
            warn!("Service '{service}' did not stop cleanly");
        }
    }

    Ok(())
}

fn print_statuses(statuses: &[ServiceStatus]) {
    println!("{:<20} {:<10} {:<16} DETAIL", "SERVICE", "KIND", "STATE");
    for status in statuses {
        println!(
            "{:<20} {:<10} {:<16} {}",
            status.name,
            status.kind.as_ref(),
            status.label,
            status.detail.as_deref().unwrap_or("-")
        );
    }
}
