//! Dependency-ordered work queue over the board's `todo` column.

use std::collections::{HashMap, HashSet};

use crate::task::{dependencies_met, Task, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueuePlan {
    /// Todo tasks in execution order: every task after its todo dependencies.
    pub queue: Vec<Task>,
    /// Todo ids left out because they sit on or behind a dependency cycle.
    pub dropped: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Placed,
    Dropped,
}

/// Order the todo tasks topologically, most urgent roots first.
///
/// Tasks in `exclude` are treated as absent. A dependency that is not in the
/// todo set does not affect ordering; readiness is checked separately by
/// [`next_ready`].
pub fn build_queue(tasks: &[Task], exclude: &HashSet<String>) -> QueuePlan {
    let mut todo: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Todo && !exclude.contains(&t.id))
        .collect();
    todo.sort_by_key(|t| t.priority.rank());

    let by_id: HashMap<&str, &Task> = todo.iter().map(|t| (t.id.as_str(), *t)).collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut order: Vec<&Task> = Vec::new();

    for task in &todo {
        visit(task.id.as_str(), &by_id, &mut marks, &mut order);
    }

    let dropped = todo
        .iter()
        .filter(|t| marks.get(t.id.as_str()) != Some(&Mark::Placed))
        .map(|t| t.id.clone())
        .collect();

    QueuePlan {
        queue: order.into_iter().cloned().collect(),
        dropped,
    }
}

fn visit<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a Task>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<&'a Task>,
) -> bool {
    match marks.get(id) {
        Some(Mark::Placed) => return true,
        Some(Mark::Visiting) | Some(Mark::Dropped) => return false,
        None => {}
    }
    let Some(task) = by_id.get(id).copied() else {
        return true;
    };

    marks.insert(id, Mark::Visiting);
    let placed = task
        .depends_on
        .iter()
        .filter(|dep| by_id.contains_key(dep.as_str()))
        .all(|dep| visit(dep.as_str(), by_id, marks, order));

    if placed {
        marks.insert(id, Mark::Placed);
        order.push(task);
    } else {
        marks.insert(id, Mark::Dropped);
    }
    placed
}

/// First queued task whose dependencies are all `done` right now.
pub fn next_ready<'a>(queue: &'a [Task], all: &[Task]) -> Option<&'a Task> {
    queue.iter().find(|task| dependencies_met(task, all))
}
