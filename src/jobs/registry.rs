use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::ScheduledJob;
use crate::errors::{LifecycleError, LifecycleResult};

/// Explicit `component -> job name -> implementation` lookup, filled once at startup
#[derive(Clone, Default)]
pub struct JobRegistry {
    components: BTreeMap<String, BTreeMap<String, Arc<dyn ScheduledJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        component: impl Into<String>,
        bean: impl Into<String>,
        job: Arc<dyn ScheduledJob>,
    ) -> Self {
        let component = component.into();
        let bean = bean.into();
        debug!("Registered job implementation {}/{}", component, bean);
        self.components.entry(component).or_default().insert(bean, job);
        self
    }

    pub fn resolve(&self, component: &str, bean: &str) -> LifecycleResult<Arc<dyn ScheduledJob>> {
        self.components
            .get(component)
            .and_then(|jobs| jobs.get(bean))
            .cloned()
            .ok_or_else(|| LifecycleError::UnregisteredJob {
                component: component.to_string(),
                bean: bean.to_string(),
            })
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.components.contains_key(component)
    }

    /// Implementations of one component, ordered by name
    pub fn jobs_of(&self, component: &str) -> Vec<(String, Arc<dyn ScheduledJob>)> {
        self.components
            .get(component)
            .map(|jobs| {
                jobs.iter()
                    .map(|(bean, job)| (bean.clone(), Arc::clone(job)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobContext;
    use crate::models::JobOutcome;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl ScheduledJob for Noop {
        fn description(&self) -> String {
            "does nothing".to_string()
        }

        async fn execute(&self, _context: &JobContext) -> anyhow::Result<JobOutcome> {
            Ok(JobOutcome::default())
        }
    }

    #[test]
    fn test_resolve() {
        let registry = JobRegistry::new()
            .register("search", "indexJob", Arc::new(Noop))
            .register("search", "cleanupJob", Arc::new(Noop));

        assert!(registry.resolve("search", "indexJob").is_ok());
        assert!(registry.has_component("search"));
        let names: Vec<String> = registry.jobs_of("search").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["cleanupJob", "indexJob"]);

        match registry.resolve("search", "missing") {
            Err(LifecycleError::UnregisteredJob { component, bean }) => {
                assert_eq!(component, "search");
                assert_eq!(bean, "missing");
            }
            _ => panic!("expected UnregisteredJob"),
        }
        assert!(registry.jobs_of("shop").is_empty());
    }
}
