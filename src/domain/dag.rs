//! Wave construction and graph queries over a set of subtasks.
//!
//! A wave is the set of subtasks whose dependency depth from the roots is equal. Wave
//! index is computed as `1 + max(wave(dep) for dep in depends_on)`, or `0` if the subtask
//! has no dependencies, then subtasks are grouped by that index. This is a restatement of
//! Kahn-style topological layering in terms of longest-path-from-root rather than
//! in-degree decrement, which is convenient because it can be computed once, memoized, and
//! re-run cheaply whenever `replace_with_subtasks` splices new nodes into a live graph.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use super::subtask::Subtask;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Computes the wave index for every subtask, detecting cycles along the way.
///
/// Returns an error if the graph contains a cycle or a dangling dependency (one that
/// references an id not present in `tasks`).
pub fn compute_waves(tasks: &[Subtask]) -> OrchestratorResult<HashMap<Uuid, usize>> {
    let by_id: HashMap<Uuid, &Subtask> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut wave = HashMap::with_capacity(tasks.len());
    let mut visiting = HashSet::new();

    for task in tasks {
        compute_wave_recursive(task.id, &by_id, &mut wave, &mut visiting)?;
    }
    Ok(wave)
}

fn compute_wave_recursive(
    id: Uuid,
    by_id: &HashMap<Uuid, &Subtask>,
    wave: &mut HashMap<Uuid, usize>,
    visiting: &mut HashSet<Uuid>,
) -> OrchestratorResult<usize> {
    if let Some(&w) = wave.get(&id) {
        return Ok(w);
    }
    if !visiting.insert(id) {
        return Err(OrchestratorError::DependencyCycle(id));
    }

    let task = by_id.get(&id).ok_or(OrchestratorError::TaskNotFound(id))?;
    let mut max_dep_wave: Option<usize> = None;
    for &dep in &task.depends_on {
        let dep_wave = compute_wave_recursive(dep, by_id, wave, visiting)?;
        max_dep_wave = Some(max_dep_wave.map_or(dep_wave, |m: usize| m.max(dep_wave)));
    }
    let this_wave = max_dep_wave.map_or(0, |m| m + 1);

    visiting.remove(&id);
    wave.insert(id, this_wave);
    Ok(this_wave)
}

/// `true` if the dependency graph among `tasks` contains a cycle.
#[must_use]
pub fn has_cycle(tasks: &[Subtask]) -> bool {
    compute_waves(tasks).is_err_and(|e| matches!(e, OrchestratorError::DependencyCycle(_)))
}

/// All transitive dependents of `root` (tasks that, directly or indirectly, depend on it),
/// via breadth-first traversal of the reversed edge set.
#[must_use]
pub fn transitive_dependents(root: Uuid, tasks: &[Subtask]) -> HashSet<Uuid> {
    let mut reverse: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for t in tasks {
        for &dep in &t.depends_on {
            reverse.entry(dep).or_default().push(t.id);
        }
    }

    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root);
    while let Some(current) = queue.pop_front() {
        if let Some(children) = reverse.get(&current) {
            for &child in children {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }
    seen
}

/// All transitive dependencies of `root`.
#[must_use]
pub fn transitive_dependencies(root: Uuid, tasks: &[Subtask]) -> HashSet<Uuid> {
    let by_id: HashMap<Uuid, &Subtask> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root);
    while let Some(current) = queue.pop_front() {
        if let Some(task) = by_id.get(&current) {
            for &dep in &task.depends_on {
                if seen.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }
    }
    seen
}

/// Ids of tasks that are a dependency of two or more other tasks ("foundation" tasks).
#[must_use]
pub fn foundation_task_ids(tasks: &[Subtask]) -> HashSet<Uuid> {
    let mut dependent_count: HashMap<Uuid, usize> = HashMap::new();
    for t in tasks {
        for &dep in &t.depends_on {
            *dependent_count.entry(dep).or_insert(0) += 1;
        }
    }
    dependent_count
        .into_iter()
        .filter(|&(_, count)| count >= 2)
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subtask::{Subtask, TaskType};

    fn task(deps: &[Uuid]) -> Subtask {
        let mut t = Subtask::new("x", TaskType::Implement, 1);
        t.depends_on = deps.to_vec();
        t
    }

    #[test]
    fn roots_are_wave_zero() {
        let a = task(&[]);
        let b = task(&[]);
        let waves = compute_waves(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(waves[&a.id], 0);
        assert_eq!(waves[&b.id], 0);
    }

    #[test]
    fn wave_is_one_plus_max_dependency_wave() {
        let a = task(&[]);
        let b = task(&[]);
        let c = task(&[a.id, b.id]);
        let waves = compute_waves(&[a.clone(), b.clone(), c.clone()]).unwrap();
        assert_eq!(waves[&a.id], 0);
        assert_eq!(waves[&b.id], 0);
        assert_eq!(waves[&c.id], 1);
    }

    #[test]
    fn wave_monotonicity_holds_on_a_chain() {
        let a = task(&[]);
        let b = task(&[a.id]);
        let c = task(&[b.id]);
        let waves = compute_waves(&[a.clone(), b.clone(), c.clone()]).unwrap();
        assert!(waves[&b.id] > waves[&a.id]);
        assert!(waves[&c.id] > waves[&b.id]);
    }

    #[test]
    fn detects_cycle() {
        let mut a = task(&[]);
        let mut b = task(&[]);
        a.depends_on = vec![b.id];
        b.depends_on = vec![a.id];
        assert!(has_cycle(&[a, b]));
    }

    #[test]
    fn transitive_dependents_follows_chain() {
        let a = task(&[]);
        let b = task(&[a.id]);
        let c = task(&[b.id]);
        let dependents = transitive_dependents(a.id, &[a.clone(), b.clone(), c.clone()]);
        assert!(dependents.contains(&b.id));
        assert!(dependents.contains(&c.id));
    }

    #[test]
    fn foundation_tasks_need_at_least_two_dependents() {
        let a = task(&[]);
        let b = task(&[a.id]);
        let c = task(&[a.id]);
        let foundations = foundation_task_ids(&[a.clone(), b, c]);
        assert!(foundations.contains(&a.id));
        assert_eq!(foundations.len(), 1);
    }
}
