use serde::Serialize;

use crate::forest::Forest;
use crate::live::TaskRow;
use crate::model::{Bucket, Task};
use crate::validate::Violation;

#[derive(Serialize)]
pub struct BucketTree<'a> {
    #[serde(flatten)]
    pub bucket: &'a Bucket,
    pub tasks: &'a [TaskRow],
}

pub fn format_bucket_list(buckets: &[Bucket]) -> String {
    let mut out = String::new();
    for bucket in buckets {
        out.push_str(&format!("{:>4}  {}\n", bucket.id, bucket.name));
    }
    out
}

pub fn format_task_detail(task: &Task) -> String {
    let mut out = String::new();
    out.push_str(&format!("Id:      {}\n", task.id));
    out.push_str(&format!("Bucket:  {}\n", task.bucket_id));
    if task.is_root() {
        out.push_str("Parent:  (root)\n");
    } else {
        out.push_str(&format!("Parent:  {}\n", task.parent_id));
    }
    out.push_str(&format!("Order:   {}\n", task.task_order));
    out.push_str(&format!(
        "Checked: {}\n",
        if task.is_checked { "yes" } else { "no" }
    ));
    out.push_str(&format!("Content: {}\n", task.content));
    out
}

fn task_line(task: &Task) -> String {
    format!("{} {}  #{}", task.icon(), task.content, task.id)
}

/// Draw a bucket's forest with box-drawing connectors.
pub fn format_task_tree(tasks: &[Task]) -> String {
    let forest = Forest::new(tasks);
    let mut out = String::new();
    for root in forest.roots() {
        write_tree(&mut out, root, &forest, "", "");
    }
    out
}

/// Write a task line and recurse into children.
/// `line_prefix` is what goes before the icon on this task's line.
/// `child_prefix` is the base prefix for this task's children's connectors.
fn write_tree(out: &mut String, task: &Task, forest: &Forest, line_prefix: &str, child_prefix: &str) {
    out.push_str(&format!("{line_prefix}{}\n", task_line(task)));

    let children = forest.children(task.id);
    for (i, child) in children.iter().enumerate() {
        let is_last = i == children.len() - 1;
        let (connector, extension) = if is_last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        write_tree(
            out,
            child,
            forest,
            &format!("{child_prefix}{connector}"),
            &format!("{child_prefix}{extension}"),
        );
    }
}

/// One line per visible row, indented by depth.
pub fn format_rows(rows: &[TaskRow]) -> String {
    let mut out = String::new();
    for row in rows.iter().filter(|r| r.is_visible) {
        let icon = row.icon();
        out.push_str(&format!(
            "{}{icon} {}  #{}\n",
            "  ".repeat(row.depth),
            row.content,
            row.id
        ));
    }
    out
}

pub fn format_violations(violations: &[Violation]) -> String {
    let mut out = String::new();
    for v in violations {
        out.push_str(&format!("{v}\n"));
    }
    out
}
