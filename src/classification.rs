use crate::config::{Client, TaskClassification, TaskDefinition};

/// Whether `client` satisfies every allow-list in `classification`.
///
/// Only constrained attributes are checked. A constrained attribute the client does not have
/// never matches, and neither does an empty allow-list.
pub fn matches(classification: &TaskClassification, client: &Client) -> bool {
    classification.constraints().into_iter().all(|(name, allowed)| {
        client
            .attribute(name)
            .is_some_and(|value| allowed.contains(&value))
    })
}

/// Keep the tasks whose classification matches `client`, in catalog order.
pub fn filter_tasks(tasks: &[TaskDefinition], client: &Client) -> Vec<TaskDefinition> {
    let matching: Vec<TaskDefinition> = tasks
        .iter()
        .filter(|task| matches(&task.classification, client))
        .cloned()
        .collect();
    tracing::debug!(
        total = tasks.len(),
        matching = matching.len(),
        "Filtered tasks by client classification"
    );
    matching
}
