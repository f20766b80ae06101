//! Task queue router.
//!
//! Maps each activity type to its named queue and carries the per-queue
//! limits workers need when leasing: the maximum number of concurrent
//! leases and the visibility timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use docflow_types::config::DocflowConfig;
use docflow_types::error::ConfigError;
use docflow_types::workflow::ActivityType;

/// A named queue and the activities routed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueue {
    pub name: String,
    pub activity_types: Vec<ActivityType>,
    pub max_concurrency: u32,
    /// Longest visibility timeout among the queue's activities.
    pub visibility_timeout: Duration,
}

/// Static routing table built once from configuration.
#[derive(Debug, Clone)]
pub struct QueueRouter {
    routes: BTreeMap<ActivityType, String>,
    queues: BTreeMap<String, TaskQueue>,
}

impl QueueRouter {
    /// Build the router, rejecting configurations that route to unknown
    /// queues or allow zero concurrency.
    pub fn from_config(config: &DocflowConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut queues: BTreeMap<String, TaskQueue> = config
            .queues
            .iter()
            .map(|(name, queue)| {
                (
                    name.clone(),
                    TaskQueue {
                        name: name.clone(),
                        activity_types: Vec::new(),
                        max_concurrency: queue.max_concurrency,
                        visibility_timeout: Duration::ZERO,
                    },
                )
            })
            .collect();

        let mut routes = BTreeMap::new();
        for activity in ActivityType::ALL {
            let name = config.routes.queue_for(activity);
            let queue = queues.get_mut(name).ok_or_else(|| ConfigError::UnknownQueue {
                activity: activity.to_string(),
                queue: name.to_string(),
            })?;
            queue.activity_types.push(activity);
            queue.visibility_timeout = queue
                .visibility_timeout
                .max(config.visibility_timeout(activity));
            routes.insert(activity, name.to_string());
        }

        Ok(Self { routes, queues })
    }

    /// Queue that tasks of `activity` are created on.
    pub fn queue_for(&self, activity: ActivityType) -> &str {
        self.routes.get(&activity).map(String::as_str).unwrap_or_default()
    }

    pub fn queue(&self, name: &str) -> Option<&TaskQueue> {
        self.queues.get(name)
    }

    /// Queues that have at least one activity routed to them.
    pub fn active_queues(&self) -> impl Iterator<Item = &TaskQueue> {
        self.queues.values().filter(|q| !q.activity_types.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_types::config::{ML_PROCESSING_QUEUE, PDF_EXTRACTION_QUEUE, QueueConfig};

    #[test]
    fn default_routing() {
        let router = QueueRouter::from_config(&DocflowConfig::default()).unwrap();
        assert_eq!(router.queue_for(ActivityType::Extract), PDF_EXTRACTION_QUEUE);
        assert_eq!(router.queue_for(ActivityType::Ocr), ML_PROCESSING_QUEUE);
        assert_eq!(router.queue_for(ActivityType::Ner), ML_PROCESSING_QUEUE);

        let ml = router.queue(ML_PROCESSING_QUEUE).unwrap();
        assert_eq!(ml.max_concurrency, 10);
        assert_eq!(ml.activity_types, vec![ActivityType::Ocr, ActivityType::Ner]);
        assert_eq!(ml.visibility_timeout, Duration::from_secs(150));

        let pdf = router.queue(PDF_EXTRACTION_QUEUE).unwrap();
        assert_eq!(pdf.visibility_timeout, Duration::from_secs(330));
    }

    #[test]
    fn unused_queue_is_not_active() {
        let mut config = DocflowConfig::default();
        config
            .queues
            .insert("spare".to_string(), QueueConfig { max_concurrency: 1 });
        let router = QueueRouter::from_config(&config).unwrap();
        let names: Vec<&str> = router.active_queues().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec![ML_PROCESSING_QUEUE, PDF_EXTRACTION_QUEUE]);
    }

    #[test]
    fn unknown_queue_is_rejected() {
        let mut config = DocflowConfig::default();
        config.routes.extract = "missing".to_string();
        assert!(matches!(
            QueueRouter::from_config(&config),
            Err(ConfigError::UnknownQueue { .. })
        ));
    }
}
