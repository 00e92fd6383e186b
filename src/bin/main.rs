use std::{error::Error, future::Future, sync::Arc, time::Duration};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use svcctl::{
    broadcast::ChannelObserver,
    cli::{Cli, Commands, parse_args},
    config::load_config,
    constants::OPERATION_LOG_FILE,
    error::ServiceError,
    logs::{OperationLog, show_logs},
    manager::LifecycleManager,
    runtime::RuntimePaths,
    status::ServiceStatus,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let mut config = load_config(args.config.as_deref())?;
    let paths = RuntimePaths::from_env();

    let mut chosen_root = None;
    match &args.command {
        Commands::Logs { lines } => {
            let log = OperationLog::new(paths.log_dir().join(OPERATION_LOG_FILE));
            show_logs(&log, *lines)?;
            return Ok(());
        }
        Commands::Install { dir: Some(dir) } | Commands::Reinstall { dir: Some(dir) } => {
            info!("Using install root {}", dir.display());
            config.install_dir = Some(dir.display().to_string());
            chosen_root = Some(dir.clone());
        }
        _ => {}
    }

    let manager = LifecycleManager::new(&config, &paths)?;
    let json = args.json;

    let result = match args.command {
        Commands::Status => Ok(manager.get_status().await),
        Commands::Watch { interval } => {
            watch(&manager, Duration::from_secs(interval.max(1)), json).await?;
            return Ok(());
        }
        Commands::Install { .. } => {
            run_operation(&manager, json, manager.install_and_start()).await
        }
        Commands::Start { if_needed: true } => {
            run_operation(&manager, json, manager.ensure_running()).await
        }
        Commands::Start { if_needed: false } => {
            run_operation(&manager, json, manager.start_existing()).await
        }
        Commands::Stop => run_operation(&manager, json, manager.stop()).await,
        Commands::Restart => run_operation(&manager, json, manager.restart()).await,
        Commands::Reinstall { .. } => {
            run_operation(&manager, json, manager.reinstall()).await
        }
        Commands::Logs { .. } => return Ok(()),
    };

    match result {
        Ok(status) => {
            // Only a successful install moves later runs to the new root.
            if let Some(root) = &chosen_root
                && let Err(err) = paths.persist_install_root(root)
            {
                warn!("Failed to remember install root {}: {err}", root.display());
            }
            print_status(&status, json)?;
            Ok(())
        }
        Err(err) => {
            if json {
                print_status(&manager.snapshot(), json)?;
            }
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
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

/// Runs a lifecycle operation while printing its progress to stderr.
async fn run_operation<F>(
    manager: &LifecycleManager,
    json: bool,
    operation: F,
) -> Result<ServiceStatus, ServiceError>
where
    F: Future<Output = Result<ServiceStatus, ServiceError>>,
{
    let (observer, mut updates) = ChannelObserver::new();
    let id = manager.attach_observer(Arc::new(observer));
    tokio::pin!(operation);

    let result = loop {
        tokio::select! {
            result = &mut operation => break result,
            Some(status) = updates.recv() => {
                if !json {
                    eprintln!("[{}] {}", status.phase, status.message);
                }
            }
        }
    };

    manager.detach_observer(id);
    result
}

/// Prints status changes until Ctrl-C, reconciling every `interval`.
async fn watch(
    manager: &LifecycleManager,
    interval: Duration,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let (observer, mut updates) = ChannelObserver::new();
    let id = manager.attach_observer(Arc::new(observer));
    let mut ticker = tokio::time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last: Option<ServiceStatus> = None;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                manager.get_status().await;
            }
            Some(status) = updates.recv() => {
                if last.as_ref().is_none_or(|prev| differs(prev, &status)) {
                    print_status(&status, json)?;
                }
                last = Some(status);
            }
        }
    }

    manager.detach_observer(id);
    Ok(())
}

/// Whether two snapshots differ in anything but their timestamp.
fn differs(a: &ServiceStatus, b: &ServiceStatus) -> bool {
    a.phase != b.phase
        || a.installed != b.installed
        || a.running != b.running
        || a.message != b.message
        || a.error != b.error
}

fn print_status(status: &ServiceStatus, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }

    let yes_no = |flag: bool| if flag { "yes" } else { "no" };
    println!("Phase:       {}", status.phase);
    println!("Installed:   {}", yes_no(status.installed));
    println!("Running:     {}", yes_no(status.running));
    println!("Message:     {}", status.message);
    if let Some(dir) = &status.install_dir {
        println!("Install dir: {dir}");
    }
    if let Some(action) = status.last_action {
        match status.last_success_at {
            Some(at) => println!("Last action: {action} ({})", at.to_rfc3339()),
            None => println!("Last action: {action}"),
        }
    }
    if let Some(error) = &status.error {
        println!("Error:       {error}");
    }
    if let Some(line) = &status.log_line {
        println!("Last output: {line}");
    }
    println!("Updated:     {}", status.updated_at.to_rfc3339());
    Ok(())
}
