use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "taskit", about = "Bucketed outline task lists")]
pub struct Cli {
    /// Path to the SQLite database [default: store.db from config, else ~/.taskit/taskit.db]
    #[arg(long, env = "TASKIT_DB", global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create database and tables (idempotent)
    Init,

    /// List buckets
    Buckets {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a bucket
    BucketNew {
        /// Bucket name [default: "new bucket"]
        name: Option<String>,
    },

    /// Rename a bucket
    BucketRename { id: i64, name: String },

    /// Delete buckets and all their tasks
    BucketRm {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Append a root task at the end of a bucket
    Add {
        bucket: i64,
        #[arg(default_value = "")]
        content: String,
    },

    /// Insert a task on the line below a task: its first child if it has
    /// children, otherwise its next sibling
    Insert {
        /// Task the new one goes below
        reference: i64,
        #[arg(default_value = "")]
        content: String,
    },

    /// Replace a task's text
    Edit { id: i64, content: String },

    /// Mark a task as checked
    Check { id: i64 },

    /// Mark a task as unchecked
    Uncheck { id: i64 },

    /// Delete a task (and its subtree, unless store.delete_policy is "row")
    Rm { id: i64 },

    /// Move a task onto the position of another one
    Move { from: i64, to: i64 },

    /// Un-indent a child task to root level
    Promote { id: i64 },

    /// Indent a root task under the task displayed above it
    Demote {
        id: i64,
        /// Task displayed directly above
        above: i64,
    },

    /// Show task details
    Show {
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a bucket's tasks as a tree
    Tree {
        bucket: i64,
        /// Output as JSON (linearized rows)
        #[arg(long)]
        json: bool,
    },

    /// Verify a bucket's ordering and parent links
    Fsck { bucket: i64 },

    /// Print a bucket and reprint it whenever the database changes
    Watch { bucket: i64 },
}
