use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;

use log::{error, info};

use printrelay::{AppConfig, AppError, BackendKind, Cli, DbusJobSource, Readiness, SysfsBackend};

#[cfg(feature = "gpiod")]
use printrelay::LibgpiodBackend;

fn init_logging(log_file: Option<&Path>) -> Result<(), AppError> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| AppError::from_io(format!("open log file {}", path.display()), e))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

async fn run(config: AppConfig, on_ready: impl FnOnce()) -> Result<(), AppError> {
    let shutdown = printrelay::termination_signal()?;
    let source = DbusJobSource::new(config.bus.clone());

    match config.gpio.backend {
        BackendKind::Sysfs => {
            let backend = SysfsBackend::new(config.gpio.sysfs_root.clone());
            printrelay::serve_notify(backend, &config, source, shutdown, on_ready).await
        }
        #[cfg(feature = "gpiod")]
        BackendKind::Gpiod => {
            let backend = LibgpiodBackend::new(config.gpio.chip.clone());
            printrelay::serve_notify(backend, &config, source, shutdown, on_ready).await
        }
        #[cfg(not(feature = "gpiod"))]
        BackendKind::Gpiod => Err(AppError::Config(
            "gpiod backend not compiled in, rebuild with --features gpiod".into(),
        )),
    }
}

fn startup() -> Result<(Cli, AppConfig), AppError> {
    let cli = Cli::parse_args(std::env::args_os())?;
    let config = cli.resolve_config()?;
    Ok((cli, config))
}

fn main() -> ExitCode {
    let (cli, config) = match startup() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("printrelay: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("printrelay: {e}");
        return ExitCode::from(e.exit_code());
    }

    info!("Starting printrelay daemon...");

    let mut readiness = if cli.foreground {
        Readiness::unattached()
    } else {
        match printrelay::detach() {
            Ok(readiness) => readiness,
            Err(e) => {
                error!("{e}");
                return ExitCode::from(e.exit_code());
            }
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            readiness.notify(1);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config, || readiness.notify(0))) {
        Ok(()) => {
            info!("Exiting printrelay daemon...");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            readiness.notify(e.exit_code());
            ExitCode::from(e.exit_code())
        }
    }
}
