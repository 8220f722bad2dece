//! Demo driver for `workunit_core`.
//!
//! # Responsibility
//! - Exercise the unit of work against a SQLite file: one customer with two
//!   orders, a lookup by id, and a concurrent batch of independent units.
//! - Print results as JSON on stdout; logs go to stderr.

mod args;

use args::{Command, CreateArgs, UsageError};
use log::{error, info};
use serde_json::json;
use std::fmt::{Display, Formatter};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use workunit_core::model::customer::ORDERS_RELATION;
use workunit_core::model::all_entities;
use workunit_core::{
    default_log_level, init_stderr_logging, CommitContext, Customer, EntityRef, Order,
    SqliteStore, StoreConfig, StoreError, Tracked, UnitOfWork,
};

const LOG_LEVEL_ENV: &str = "WORKUNIT_LOG";

#[derive(Debug)]
enum CliError {
    Usage(UsageError),
    Store(StoreError),
    Logging(String),
    Json(serde_json::Error),
    NotFound(i64),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Logging(message) => write!(f, "logging init failed: {message}"),
            Self::Json(err) => write!(f, "json encoding failed: {err}"),
            Self::NotFound(id) => write!(f, "customer {id} not found"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Usage(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Logging(_) | Self::NotFound(_) => None,
        }
    }
}

impl From<UsageError> for CliError {
    fn from(value: UsageError) -> Self {
        Self::Usage(value)
    }
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    match run(&raw) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            match err {
                CliError::Usage(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(raw: &[String]) -> Result<String, CliError> {
    let command = args::parse(raw)?;

    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| default_log_level().to_string());
    init_stderr_logging(&level).map_err(CliError::Logging)?;

    match command {
        Command::Create(create) => create_customer(&create),
        Command::Get { db, id } => get_customer(&db, id),
        Command::Concurrent { db, threads } => run_concurrent(&db, threads),
    }
}

fn open_store(db: &str) -> Result<Arc<SqliteStore>, CliError> {
    let store = SqliteStore::open(db, StoreConfig::default())?;
    store.ensure_schema_for(&all_entities())?;
    Ok(Arc::new(store))
}

/// Inserts a customer, attaches two orders and renames the customer, all in
/// one commit, then prints the customer reloaded with its orders.
fn create_customer(create: &CreateArgs) -> Result<String, CliError> {
    let store = open_store(&create.db)?;
    let ctx = CommitContext::background();
    let uow = UnitOfWork::new(store);

    let email = create
        .email
        .clone()
        .unwrap_or_else(|| format!("ada+{}@example.com", unique_suffix()));
    let customer = Tracked::new(Customer::new(create.name.clone(), email));
    uow.queue_create(&customer);

    let amounts = [create.first_amount, create.second_amount];
    {
        let customer = customer.clone();
        uow.queue_operation(move |scope| {
            let customer_id = customer
                .id()
                .ok_or(StoreError::MissingId { table: "customers" })?;
            for amount in amounts {
                scope.create(EntityRef::new(Order::new(customer_id, amount)))?;
            }
            customer.update(|c| c.name = format!("{} Jr.", c.name));
            scope.queue_update(&customer);
            Ok(())
        });
    }

    uow.save_changes(&ctx)?;

    let id = customer
        .id()
        .ok_or(StoreError::MissingId { table: "customers" })?;
    info!("event=cli_create module=cli status=ok customer_id={id}");
    let loaded: Customer = uow
        .preload_first(&ctx, id, &[ORDERS_RELATION])?
        .ok_or(CliError::NotFound(id))?;
    Ok(serde_json::to_string(&loaded)?)
}

fn get_customer(db: &str, id: i64) -> Result<String, CliError> {
    let store = open_store(db)?;
    let uow = UnitOfWork::new(store);
    let loaded: Customer = uow
        .preload_first(&CommitContext::background(), id, &[ORDERS_RELATION])?
        .ok_or(CliError::NotFound(id))?;
    Ok(serde_json::to_string(&loaded)?)
}

/// Runs `threads` independent units of work against one shared store.
fn run_concurrent(db: &str, threads: usize) -> Result<String, CliError> {
    let store = open_store(db)?;
    let handles: Vec<_> = (0..threads)
        .map(|index| {
            let store = Arc::clone(&store);
            thread::spawn(move || commit_user(store, index))
        })
        .collect();

    let (mut ok, mut fail) = (0usize, 0usize);
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => ok += 1,
            Ok(Err(err)) => {
                error!("event=cli_concurrent module=cli status=error error={err}");
                fail += 1;
            }
            Err(_) => {
                error!("event=cli_concurrent module=cli status=error error=worker_panicked");
                fail += 1;
            }
        }
    }
    info!("event=cli_concurrent module=cli status=ok threads={threads} ok={ok} fail={fail}");

    Ok(serde_json::to_string(&json!({
        "threads": threads,
        "ok": ok,
        "fail": fail,
    }))?)
}

fn commit_user(store: Arc<SqliteStore>, index: usize) -> Result<(), StoreError> {
    let uow = UnitOfWork::new(store);
    let customer = Tracked::new(Customer::new(
        format!("User {index}"),
        format!("user{index}+{}@example.com", unique_suffix()),
    ));
    uow.queue_create(&customer);

    let amount = 10.0 + index as f64;
    uow.queue_operation(move |scope| {
        let customer_id = customer
            .id()
            .ok_or(StoreError::MissingId { table: "customers" })?;
        scope.create(EntityRef::new(Order::new(customer_id, amount)))
    });

    uow.commit(&CommitContext::background())
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
}
