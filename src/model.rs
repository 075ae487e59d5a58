use serde::Serialize;

/// `parent_id` value of a root-level task.
pub const ROOT_PARENT: i64 = -1;

/// Name given to buckets created without one.
pub const DEFAULT_BUCKET_NAME: &str = "new bucket";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    pub bucket_id: i64,
    pub parent_id: i64,
    pub task_order: i64,
    pub content: String,
    pub is_checked: bool,
}

impl Task {
    pub fn is_root(&self) -> bool {
        self.parent_id < 0
    }

    pub fn icon(&self) -> &'static str {
        check_icon(self.is_checked)
    }
}

/// Returns display icon: x=checked, .=unchecked
pub fn check_icon(is_checked: bool) -> &'static str {
    if is_checked {
        "x"
    } else {
        "."
    }
}
