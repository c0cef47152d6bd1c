use crate::pipeline::{compute_fingerprint, FingerprintStore, Item, PipelineRejection, Stage};
use crate::JobId;
use std::sync::Arc;

/// What the pipeline made of a fetched item
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// First item with this fingerprint; hand it to the sink
    Clean { item: Item, fingerprint: String },

    /// Another item of the job already claimed this fingerprint
    Duplicate { fingerprint: String },
}

impl Processed {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            Self::Clean { fingerprint, .. } | Self::Duplicate { fingerprint } => fingerprint,
        }
    }
}

/// Ordered stage chain for one job
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    fingerprint_fields: Vec<String>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>, fingerprint_fields: Vec<String>) -> Self {
        Self {
            stages,
            fingerprint_fields,
        }
    }

    /// Stage names in run order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs the stages, then claims the item's fingerprint for `job`
    ///
    /// The first rejection stops the chain. A rejected item never touches the
    /// fingerprint store.
    pub fn process(
        &self,
        job: JobId,
        item: Item,
        fingerprints: &FingerprintStore,
    ) -> Result<Processed, PipelineRejection> {
        let url = item.url.clone();
        let mut item = item;
        for stage in &self.stages {
            item = stage.process(item).map_err(|rejection| {
                tracing::debug!("{}: {}", url, rejection);
                rejection
            })?;
        }

        let fingerprint = compute_fingerprint(&item, &self.fingerprint_fields);
        if fingerprints.check_and_insert(job, &fingerprint) {
            Ok(Processed::Clean { item, fingerprint })
        } else {
            tracing::debug!("Duplicate item {} ({})", item.url, &fingerprint[..12]);
            Ok(Processed::Duplicate { fingerprint })
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("fingerprint_fields", &self.fingerprint_fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{NormalizeWhitespaceStage, RequireFieldsStage};
    use serde_json::json;

    struct Tag(&'static str);

    impl Stage for Tag {
        fn name(&self) -> &str {
            self.0
        }

        fn process(&self, mut item: Item) -> Result<Item, PipelineRejection> {
            let mut seen = item.field_text("seen").unwrap_or_default();
            seen.push_str(self.0);
            item.fields.insert("seen".to_string(), json!(seen));
            Ok(item)
        }
    }

    #[test]
    fn test_stages_run_in_order() {
        let pipeline = Pipeline::new(vec![Arc::new(Tag("a")), Arc::new(Tag("b"))], vec![]);
        let store = FingerprintStore::new();

        match pipeline
            .process(JobId::new_v4(), Item::new("https://example.com/", ""), &store)
            .unwrap()
        {
            Processed::Clean { item, .. } => assert_eq!(item.fields["seen"], json!("ab")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejection_short_circuits_and_skips_fingerprint() {
        let pipeline = Pipeline::new(
            vec![
                Arc::new(RequireFieldsStage {
                    fields: vec!["title".to_string()],
                }),
                Arc::new(Tag("never")),
            ],
            vec![],
        );
        let store = FingerprintStore::new();

        let rejection = pipeline
            .process(JobId::new_v4(), Item::new("https://example.com/", ""), &store)
            .unwrap_err();
        assert_eq!(rejection.stage, "require-fields");
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicates_reported() {
        let pipeline = Pipeline::new(
            vec![Arc::new(NormalizeWhitespaceStage)],
            vec!["title".to_string()],
        );
        let store = FingerprintStore::new();
        let job = JobId::new_v4();

        let mut outcomes = Vec::new();
        for (i, title) in ["Blue  Widget", "Blue Widget", " Blue Widget "].iter().enumerate() {
            let mut item = Item::new(format!("https://example.com/{}", i), "");
            item.fields.insert("title".to_string(), json!(title));
            outcomes.push(pipeline.process(job, item, &store).unwrap());
        }

        assert!(!outcomes[0].is_duplicate());
        assert!(outcomes[1].is_duplicate());
        assert!(outcomes[2].is_duplicate());
        assert_eq!(outcomes[0].fingerprint(), outcomes[2].fingerprint());
    }
}
