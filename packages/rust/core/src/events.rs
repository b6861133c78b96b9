//! Lifecycle signals emitted by pipeline operations.

use std::sync::Mutex;

use contentforge_shared::{ClusterId, FeedId, RunId, Stage};
use serde::Serialize;
use tracing::info;

/// One lifecycle signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    FeedPolled {
        feed_id: FeedId,
        site_id: String,
        entries: usize,
        new_items: usize,
    },
    ItemsScored {
        scored: usize,
        total: usize,
    },
    FactsExtracted {
        extracted: usize,
        total: usize,
    },
    FactsChecked {
        checked: usize,
        total: usize,
        verified_claims: usize,
        unverified_claims: usize,
    },
    ItemsEmbedded {
        embedded: usize,
        total: usize,
    },
    ItemsClustered {
        clusters: Vec<ClusterId>,
        items: usize,
        unlabeled: usize,
    },
    SectionsGenerated {
        run_id: RunId,
        sections: usize,
        words: usize,
    },
    ArticleAssembled {
        run_id: RunId,
        word_count: usize,
    },
    ArticlePublished {
        run_id: RunId,
        site_id: String,
        remote_post_id: String,
        url: String,
    },
    PipelineCompleted {
        site_id: String,
        run_id: RunId,
    },
    PipelineFailed {
        site_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        message: String,
    },
}

impl PipelineEvent {
    /// Signal name, e.g. `items_scored`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FeedPolled { .. } => "feed_polled",
            Self::ItemsScored { .. } => "items_scored",
            Self::FactsExtracted { .. } => "facts_extracted",
            Self::FactsChecked { .. } => "facts_checked",
            Self::ItemsEmbedded { .. } => "items_embedded",
            Self::ItemsClustered { .. } => "items_clustered",
            Self::SectionsGenerated { .. } => "sections_generated",
            Self::ArticleAssembled { .. } => "article_assembled",
            Self::ArticlePublished { .. } => "article_published",
            Self::PipelineCompleted { .. } => "pipeline_completed",
            Self::PipelineFailed { .. } => "pipeline_failed",
        }
    }
}

/// Receiver of lifecycle signals.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Logs every signal under the `contentforge::events` target.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(target: "contentforge::events", event = event.name(), %payload, "pipeline event");
    }
}

/// Keeps every signal in memory, in emission order.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(PipelineEvent::name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_event_serializes_with_tag() {
        let event = PipelineEvent::PipelineFailed {
            site_id: "tech".into(),
            stage: Some(Stage::Generate),
            message: "generate stage failed: boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "pipeline_failed");
        assert_eq!(json["stage"], "generate");
        assert_eq!(event.name(), "pipeline_failed");
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        sink.emit(&PipelineEvent::ItemsScored { scored: 1, total: 2 });
        sink.emit(&PipelineEvent::FactsExtracted { extracted: 0, total: 1 });
        assert_eq!(sink.names(), vec!["items_scored", "facts_extracted"]);
    }
}
