//! Parent/child task relationships and nested tree assembly.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::model::{Task, TaskNode};

impl Manager {
    pub async fn has_children(&self, id: &str) -> Result<bool> {
        Ok(self.store().count_children(id).await? > 0)
    }

    /// Direct children only, friendly-number order.
    pub async fn child_tasks(&self, id: &str) -> Result<Vec<Task>> {
        self.store().tasks_by_parent(id).await
    }

    /// Build the nested {task, children[]} tree rooted at `root_id`.
    ///
    /// The parent link is fixed at creation and never mutated, so the graph
    /// is acyclic by construction; depth is unbounded, so the walk uses an
    /// explicit queue instead of recursion. Tasks are collected breadth
    /// first, then nodes are stitched together deepest-first.
    pub async fn task_tree(&self, root_id: &str) -> Result<TaskNode> {
        let root = self.get_task(root_id).await?;
        let root_id = root.id.clone();

        let mut order: Vec<Task> = vec![root];
        let mut queue: VecDeque<String> = VecDeque::from([root_id.clone()]);
        while let Some(id) = queue.pop_front() {
            for child in self.store().tasks_by_parent(&id).await? {
                queue.push_back(child.id.clone());
                order.push(child);
            }
        }

        // Reverse traversal order guarantees a task's children are already
        // built when the task itself is reached.
        let mut built: HashMap<String, Vec<TaskNode>> = HashMap::new();
        let mut root_node: Option<TaskNode> = None;
        for task in order.into_iter().rev() {
            let mut children = built.remove(&task.id).unwrap_or_default();
            children.reverse();
            let is_root = task.id == root_id;
            let parent = task.parent_task_id.clone();
            let node = TaskNode { task, children };
            if is_root {
                root_node = Some(node);
            } else if let Some(parent_id) = parent {
                built.entry(parent_id).or_default().push(node);
            }
        }
        root_node.ok_or_else(|| Error::not_found(format!("task {root_id}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::manager::tests::{draft, memory_manager};
    use crate::model::TaskDraft;

    #[tokio::test]
    async fn tree_nests_children_of_children() {
        let m = memory_manager().await;
        let root = m.create_task(draft("root")).await.unwrap();

        let child = |parent: &str, name: &str| TaskDraft {
            task_type: name.to_string(),
            parent_task_id: Some(parent.to_string()),
            ..TaskDraft::default()
        };
        let a = m.create_task(child(&root.id, "a")).await.unwrap();
        let b = m.create_task(child(&root.id, "b")).await.unwrap();
        let c = m.create_task(child(&a.id, "c")).await.unwrap();

        let tree = m.task_tree(&root.id).await.unwrap();
        assert_eq!(tree.task.id, root.id);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].task.id, a.id);
        assert_eq!(tree.children[1].task.id, b.id);
        assert_eq!(tree.children[0].children.len(), 1);
        assert_eq!(tree.children[0].children[0].task.id, c.id);
        assert!(tree.children[1].children.is_empty());

        assert!(m.has_children(&root.id).await.unwrap());
        assert!(!m.has_children(&b.id).await.unwrap());
        assert_eq!(m.child_tasks(&root.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tree_on_leaf_is_a_single_node() {
        let m = memory_manager().await;
        let t = m.create_task(draft("solo")).await.unwrap();
        let tree = m.task_tree(&t.id).await.unwrap();
        assert_eq!(tree.task.id, t.id);
        assert!(tree.children.is_empty());
    }

    #[tokio::test]
    async fn tree_on_missing_root_is_not_found() {
        let m = memory_manager().await;
        assert!(matches!(
            m.task_tree("ghost").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
