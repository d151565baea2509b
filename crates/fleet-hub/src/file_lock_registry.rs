use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory map from file path to the task ID claiming it, scoped to a
/// single team. Used only to detect same-team file contention for
/// telemetry — it never blocks a claim. Cross-task conflicts within a team
/// are a modeling concern the Decomposer already resolves by grouping
/// file-affine tasks together; cross-team conflicts are the
/// DebateCoordinator's job.
#[derive(Default)]
pub struct FileLockRegistry {
    claims: Mutex<HashMap<String, String>>,
}

impl FileLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, task_id: &str, files: &[String]) {
        let mut claims = self.claims.lock().unwrap();
        for file in files {
            claims.insert(file.clone(), task_id.to_string());
        }
    }

    pub fn release(&self, task_id: &str) {
        let mut claims = self.claims.lock().unwrap();
        claims.retain(|_, owner| owner != task_id);
    }

    /// Files currently claimed by some task other than `task_id`.
    pub fn files_in_use_by_others(&self, task_id: &str, files: &[String]) -> Vec<String> {
        let claims = self.claims.lock().unwrap();
        files
            .iter()
            .filter(|file| claims.get(*file).is_some_and(|owner| owner != task_id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_files_claimed_by_another_task() {
        let registry = FileLockRegistry::new();
        registry.claim("t1", &["a.rs".to_string(), "b.rs".to_string()]);
        let contended = registry.files_in_use_by_others("t2", &["a.rs".to_string(), "c.rs".to_string()]);
        assert_eq!(contended, vec!["a.rs".to_string()]);
    }

    #[test]
    fn releasing_a_task_frees_its_files() {
        let registry = FileLockRegistry::new();
        registry.claim("t1", &["a.rs".to_string()]);
        registry.release("t1");
        assert!(registry.files_in_use_by_others("t2", &["a.rs".to_string()]).is_empty());
    }

    #[test]
    fn a_task_never_contends_with_its_own_claim() {
        let registry = FileLockRegistry::new();
        registry.claim("t1", &["a.rs".to_string()]);
        assert!(registry.files_in_use_by_others("t1", &["a.rs".to_string()]).is_empty());
    }
}
