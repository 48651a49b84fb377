use std::{process, sync::Arc};

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use quire::{
    application::{
        admin::{AdminCacheService, UpdateOptionsCommand},
        error::AppError,
        jobs::{
            INTERVAL_POLL, ScheduledPurgeContext, process_scheduled_purge_job,
            purge_interval_changed, purge_schedule,
        },
    },
    cache::{CacheConfig, LoadState, NoHooks, PageCache},
    config::{self, Command, ConfigCommand, ConfigSetArgs, PurgeTarget},
    infra::{error::InfraError, telemetry},
};
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error.chain(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?error.chain(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let cache = PageCache::new(CacheConfig::from(&settings.cache), Arc::new(NoHooks));
    if let LoadState::Invalid(reason) = cache.options.load_state() {
        warn!(
            path = %cache.options.path().display(),
            reason = %reason,
            "cache options could not be loaded; running with defaults"
        );
    }

    let command = cli_args.command.unwrap_or(Command::Schedule);
    match command {
        Command::Schedule => run_schedule(&cache).await,
        Command::Purge(args) => run_purge(&cache, args.target),
        Command::List => run_list(&cache),
        Command::Config(args) => run_config(&cache, args.command),
    }
}

async fn run_schedule(cache: &PageCache) -> Result<(), AppError> {
    let mut interval = cache.options.purge_interval();

    loop {
        let schedule = purge_schedule(interval)?;
        let context = ScheduledPurgeContext {
            invalidator: cache.invalidator.clone(),
        };
        let worker = WorkerBuilder::new("scheduled-purge-worker")
            .data(context)
            .backend(CronStream::new(schedule))
            .build_fn(process_scheduled_purge_job);

        info!(
            purge_interval = %interval,
            root = %cache.config.root.display(),
            "scheduled purge running"
        );

        let (reschedule_tx, mut reschedule_rx) = oneshot::channel();
        let options = Arc::clone(&cache.options);
        let active = interval;
        let signal = async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result,
                next = purge_interval_changed(options, active, INTERVAL_POLL) => {
                    let _ = reschedule_tx.send(next);
                    Ok(())
                }
            }
        };

        Monitor::new()
            .register(worker)
            .run_with_signal(signal)
            .await
            .map_err(|err| AppError::from(InfraError::scheduler(err.to_string())))?;

        match reschedule_rx.try_recv() {
            Ok(next) => interval = next,
            Err(_) => break,
        }
    }

    info!("scheduled purge stopped");
    Ok(())
}

fn run_purge(cache: &PageCache, target: PurgeTarget) -> Result<(), AppError> {
    let service = AdminCacheService::new(cache);
    let report = match target {
        PurgeTarget::All => service.purge_all()?,
        PurgeTarget::Url(args) => service.purge_url(&args.url, args.depth)?,
    };
    println!("{} cached page(s) deleted", report.deleted);
    Ok(())
}

fn run_list(cache: &PageCache) -> Result<(), AppError> {
    let service = AdminCacheService::new(cache);
    for url in service.cached_urls() {
        println!("{url}");
    }
    Ok(())
}

fn run_config(cache: &PageCache, command: ConfigCommand) -> Result<(), AppError> {
    let service = AdminCacheService::new(cache);
    match command {
        ConfigCommand::Show => {
            let view = service.options();
            println!("file = {}", cache.options.path().display());
            println!("state = {:?}", view.state);
            println!("purge_interval = {}", view.options.purge_interval);
            for url in &view.options.exception_urls {
                println!("exception_url = {url}");
            }
        }
        ConfigCommand::Set(args) => {
            let saved = service.update_options(update_command(args)?)?;
            println!(
                "saved: purge_interval = {}, {} exception url(s)",
                saved.purge_interval,
                saved.exception_urls.len()
            );
        }
        ConfigCommand::Reset => {
            service.reset_options()?;
            println!("options reset to defaults");
        }
        ConfigCommand::Remove => {
            service.remove_options()?;
            println!("options file removed");
        }
    }
    Ok(())
}

fn update_command(args: ConfigSetArgs) -> Result<UpdateOptionsCommand, AppError> {
    let exception_urls = if args.clear_exceptions {
        Some(Vec::new())
    } else if args.exception_urls.is_empty() {
        None
    } else {
        Some(args.exception_urls)
    };

    if args.purge_interval.is_none() && exception_urls.is_none() {
        return Err(AppError::validation(
            "nothing to change; pass --purge-interval, --exception-url or --clear-exceptions",
        ));
    }

    Ok(UpdateOptionsCommand {
        purge_interval: args.purge_interval,
        exception_urls,
    })
}
