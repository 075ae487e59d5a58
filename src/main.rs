mod cli;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::LevelFilter;

use cli::{Cli, Command};
use taskit::config::Config;
use taskit::ops::{Outcome, Skip};
use taskit::output::{self, BucketTree};
use taskit::store::Store;
use taskit::{live, watch};

fn ensure_db_dir(db_path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Logs go to stderr. `TASKIT_LOG` overrides the configured level.
fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("TASKIT_LOG")
        .format_timestamp_secs()
        .init();
}

/// Print `done` if the operation applied. Missing tasks are errors; other
/// skips are reported and succeed.
fn report(outcome: Outcome, done: &str) -> Result<()> {
    match outcome {
        Outcome::Applied { .. } => eprintln!("{done}"),
        Outcome::Skipped(reason @ (Skip::MissingTask | Skip::MissingBucket)) => bail!("{reason}"),
        Outcome::Skipped(reason) => eprintln!("Nothing to do: {reason}"),
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_logging(config.log_level());

    let db_path = config.db_path(cli.db.as_deref());
    ensure_db_dir(&db_path)?;
    let store = Store::open(&db_path)?.with_delete_policy(config.delete_policy());

    dispatch(store, &db_path, cli.command)
}

fn dispatch(store: Store, db_path: &str, command: Command) -> Result<()> {
    match command {
        Command::Init => {
            eprintln!("Initialized database at {db_path}");
        }

        Command::Buckets { json } => {
            let buckets = store.buckets()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&buckets)?);
            } else {
                print!("{}", output::format_bucket_list(&buckets));
            }
        }

        Command::BucketNew { name } => {
            let bucket = store.create_bucket(name.as_deref())?;
            println!("{}", bucket.id);
            eprintln!("Created bucket '{}'", bucket.name);
        }

        Command::BucketRename { id, name } => {
            if !store.rename_bucket(id, &name)? {
                bail!("bucket {id} not found");
            }
            eprintln!("Renamed bucket {id} to '{name}'");
        }

        Command::BucketRm { ids } => {
            let removed = store.delete_buckets(&ids)?;
            eprintln!("Removed {removed} bucket(s)");
        }

        Command::Add { bucket, content } => match store.append_task(bucket, &content)? {
            Some(task) => {
                println!("{}", task.id);
                eprintln!("Added task {} to bucket {bucket}", task.id);
            }
            None => bail!("bucket {bucket} not found"),
        },

        Command::Insert { reference, content } => {
            match store.insert_task_above(reference, &content)? {
                Some(task) => {
                    println!("{}", task.id);
                    eprintln!("Inserted task {} below {reference}", task.id);
                }
                None => bail!("task {reference} not found"),
            }
        }

        Command::Edit { id, content } => {
            report(store.update_task_content(id, &content)?, &format!("Updated task {id}"))?;
        }

        Command::Check { id } => {
            report(store.update_task_checked(id, true)?, &format!("Checked task {id}"))?;
        }

        Command::Uncheck { id } => {
            report(store.update_task_checked(id, false)?, &format!("Unchecked task {id}"))?;
        }

        Command::Rm { id } => {
            report(store.delete_task(id)?, &format!("Removed task {id}"))?;
        }

        Command::Move { from, to } => {
            report(store.reorder_task(from, to)?, &format!("Moved task {from} to {to}"))?;
        }

        Command::Promote { id } => {
            report(store.promote_to_root(id)?, &format!("Moved task {id} to root level"))?;
        }

        Command::Demote { id, above } => {
            report(store.demote_to_child(id, above)?, &format!("Indented task {id} under {above}"))?;
        }

        Command::Show { id, json } => {
            let Some(task) = store.task(id)? else {
                bail!("task {id} not found");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print!("{}", output::format_task_detail(&task));
            }
        }

        Command::Tree { bucket, json } => {
            let Some(b) = store.bucket(bucket)? else {
                bail!("bucket {bucket} not found");
            };
            let tasks = store.tasks(bucket)?;
            if json {
                let rows = live::annotate(&tasks, None);
                let tree = BucketTree {
                    bucket: &b,
                    tasks: &rows,
                };
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print!("{}", output::format_task_tree(&tasks));
            }
        }

        Command::Fsck { bucket } => {
            let violations = store.check(bucket)?;
            if !violations.is_empty() {
                print!("{}", output::format_violations(&violations));
                bail!("bucket {bucket} has {} problem(s)", violations.len());
            }
            eprintln!("Bucket {bucket} is consistent");
        }

        Command::Watch { bucket } => {
            if store.bucket(bucket)?.is_none() {
                bail!("bucket {bucket} not found");
            }
            let store = Arc::new(store);
            let _external = watch::forward_external(db_path, Arc::clone(store.bus()))?;
            let session = store.drag_session();
            for rows in store.tasks_live(bucket, session) {
                let rows = rows?;
                println!("--- bucket {bucket}");
                print!("{}", output::format_rows(&rows));
            }
        }
    }

    Ok(())
}
