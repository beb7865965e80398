// Fixed registry of segmentation tasks the service knows how to prepare.

/// One registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Task name understood by the model runtime.
    pub runtime_task: &'static str,
    pub approximate_size_mb: u64,
    /// Structures this task segments. Empty when the task covers the
    /// runtime's whole structure set.
    pub structures: &'static [&'static str],
}

pub const VERTEBRA_STRUCTURES: &[&str] = &[
    "vertebrae_C1",
    "vertebrae_C2",
    "vertebrae_C3",
    "vertebrae_C4",
    "vertebrae_C5",
    "vertebrae_C6",
    "vertebrae_C7",
    "vertebrae_T1",
    "vertebrae_T2",
    "vertebrae_T3",
    "vertebrae_T4",
    "vertebrae_T5",
    "vertebrae_T6",
    "vertebrae_T7",
    "vertebrae_T8",
    "vertebrae_T9",
    "vertebrae_T10",
    "vertebrae_T11",
    "vertebrae_T12",
    "vertebrae_L1",
    "vertebrae_L2",
    "vertebrae_L3",
    "vertebrae_L4",
    "vertebrae_L5",
    "vertebrae_S1",
];

pub const TASKS: &[TaskSpec] = &[
    TaskSpec {
        id: "vertebrae",
        name: "Vertebrae Segmentation",
        description: "Segments all vertebrae (C1-C7, T1-T12, L1-L5, S1)",
        runtime_task: "total",
        approximate_size_mb: 2048,
        structures: VERTEBRA_STRUCTURES,
    },
    TaskSpec {
        id: "total_body",
        name: "Total Body Segmentation",
        description: "Segments 104 anatomical structures",
        runtime_task: "total",
        approximate_size_mb: 5120,
        structures: &[],
    },
];

pub fn lookup(task_id: &str) -> Option<&'static TaskSpec> {
    TASKS.iter().find(|task| task.id == task_id)
}

pub fn task_ids() -> Vec<String> {
    TASKS.iter().map(|task| task.id.to_string()).collect()
}
