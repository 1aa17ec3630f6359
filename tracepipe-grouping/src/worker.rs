// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Grouping worker: the single cooperative consumer that clusters
//! unmatched traces within a `(project, path)` scope and back-assigns them
//! to newly created implementations.

use std::sync::Arc;
use std::time::Duration;

use tracepipe_core::config::GroupingConfig;
use tracepipe_core::model::{Trace, TraceId};
use tracepipe_core::store::{ClusterDraft, TraceStore};

use crate::queue::{GroupingQueueConsumer, Request};

pub struct GroupingWorker {
    store: Arc<dyn TraceStore>,
    config: GroupingConfig,
    consumer: GroupingQueueConsumer,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub noop: usize,
    pub clusters_created: usize,
    pub traces_assigned: usize,
}

impl GroupingWorker {
    pub fn new(
        store: Arc<dyn TraceStore>,
        config: GroupingConfig,
        consumer: GroupingQueueConsumer,
    ) -> Self {
        Self {
            store,
            config,
            consumer,
        }
    }

    /// Spawns the worker's consumer loop. Shutdown is signaled by
    /// cancelling `shutdown`; the loop polls with `worker_poll_timeout_ms`
    /// so it notices the signal promptly even while the queue is idle.
    /// Panics inside a single request's processing never escape this
    /// loop.
    pub fn spawn(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("grouping worker started");
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let poll = tokio::time::timeout(
                    Duration::from_millis(self.config.worker_poll_timeout_ms),
                    self.consumer.recv(),
                )
                .await;

                match poll {
                    Ok(Some(request)) => {
                        let store = self.store.clone();
                        let config = self.config.clone();
                        // Isolate panics: a crashed request must not kill the
                        // worker's outer loop.
                        let result = std::panic::AssertUnwindSafe(process_request(
                            store,
                            config,
                            request.clone(),
                            &self.consumer,
                        ))
                        .catch_unwind()
                        .await;

                        if let Err(panic) = result {
                            tracing::error!(?panic, "grouping worker request panicked");
                        }
                    }
                    Ok(None) => {
                        tracing::info!("grouping queue closed, shutting down worker");
                        break;
                    }
                    Err(_timeout) => continue,
                }
            }
            tracing::info!("grouping worker shut down");
        })
    }
}

trait CatchUnwind: std::future::Future + Sized {
    fn catch_unwind(self) -> futures::future::CatchUnwind<futures::future::AssertUnwindSafe<Self>>
    where
        Self: std::panic::UnwindSafe,
    {
        futures::FutureExt::catch_unwind(futures::future::AssertUnwindSafe(self))
    }
}

impl<F: std::future::Future> CatchUnwind for F {}

async fn process_request(
    store: Arc<dyn TraceStore>,
    config: GroupingConfig,
    request: Request,
    consumer: &GroupingQueueConsumer,
) {
    // DEQUEUED -> supersede check -> SKIPPED
    if consumer.is_superseded(&request) {
        tracing::info!(
            trace_id = %request.trace_id,
            "skipping grouping request superseded by a newer trace"
        );
        return;
    }

    match perform_grouping(&store, &config, &request).await {
        Ok(Some(summary)) => {
            tracing::info!(
                trace_id = %request.trace_id,
                clusters = summary.clusters_created,
                traces_assigned = summary.traces_assigned,
                "grouping request completed"
            );
        }
        Ok(None) => {
            tracing::debug!(trace_id = %request.trace_id, "grouping request was a no-op");
        }
        Err(err) => {
            tracing::error!(trace_id = %request.trace_id, error = %err, "grouping request failed");
        }
    }

    consumer.clear_if_current(&request);
}

async fn perform_grouping(
    store: &Arc<dyn TraceStore>,
    config: &GroupingConfig,
    request: &Request,
) -> anyhow::Result<Option<RunSummary>> {
    // LOADING
    let traces = store
        .list_unmatched_traces(request.project_id, request.path.as_deref())
        .await?;

    if traces.len() < config.min_cluster_size {
        return Ok(None);
    }

    // PROMPT EXTRACTION
    let mut prompts = Vec::new();
    let mut trace_for_prompt: Vec<&Trace> = Vec::new();
    for trace in &traces {
        if let Some(instructions) = trace.instructions_string() {
            prompts.push(instructions);
            trace_for_prompt.push(trace);
        }
    }

    if prompts.len() < config.min_matching_traces {
        return Ok(None);
    }

    // GROUPING
    let groups = tracepipe_inference::group(&prompts, config.min_segment_words, config.min_matching_traces);
    if groups.is_empty() {
        return Ok(None);
    }

    let mut summary = RunSummary::default();

    for (template, indices) in groups {
        // Each cluster's persistence is isolated: an error here aborts only
        // this cluster, not the whole request.
        match persist_cluster(store, config, request, &template, &indices, &trace_for_prompt, &prompts)
            .await
        {
            Ok(assigned) => {
                summary.clusters_created += 1;
                summary.traces_assigned += assigned;
            }
            Err(err) => {
                tracing::warn!(
                    template = %template,
                    error = %err,
                    "failed to persist cluster, skipping"
                );
            }
        }
    }

    Ok(Some(summary))
}

#[allow(clippy::too_many_arguments)]
async fn persist_cluster(
    store: &Arc<dyn TraceStore>,
    config: &GroupingConfig,
    request: &Request,
    template: &str,
    indices: &[usize],
    trace_for_prompt: &[&Trace],
    prompts: &[String],
) -> anyhow::Result<usize> {
    let representative_idx = *indices
        .first()
        .ok_or_else(|| anyhow::anyhow!("empty cluster"))?;
    let representative = trace_for_prompt[representative_idx];

    // Bind every cluster member against the rendered template up front so
    // the whole cluster (task, implementation, trace assignments) commits
    // as one transaction (§4.F step 5).
    let mut assignments = Vec::new();
    for &idx in indices {
        let trace = trace_for_prompt[idx];
        if let Some(bindings) = tracepipe_matcher::match_template(template, &prompts[idx]) {
            assignments.push((trace.id, bindings));
        }
    }

    let draft = ClusterDraft {
        prompt: template.to_string(),
        model: representative.model.clone(),
        temperature: representative.temperature,
        max_output_tokens: config.default_max_output_tokens,
        tools: representative.tools.clone(),
        tool_choice: representative.tool_choice.clone(),
        reasoning: representative.reasoning.clone(),
        temp: true,
        assignments,
    };

    let (_task, _implementation, assigned) = store
        .persist_cluster(request.project_id, request.path.as_deref(), draft)
        .await?;

    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracepipe_core::model::{MessageContent, MessageRole, ProjectId};
    use tracepipe_core::store::{SqliteStore, TraceDraft};

    async fn store_with_traces(prompts: &[&str]) -> (Arc<dyn TraceStore>, ProjectId) {
        let store: Arc<dyn TraceStore> = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        let project = store.get_or_create_project("acme").await.unwrap();

        for prompt in prompts {
            let draft = TraceDraft {
                project_id: project.id,
                implementation_id: None,
                path: Some("/chat".to_string()),
                model: "gpt-4".to_string(),
                started_at: chrono::Utc::now(),
                completed_at: None,
                instructions: None,
                prompt: None,
                input_items: vec![tracepipe_core::model::TraceInputItem::Message {
                    role: MessageRole::System,
                    content: MessageContent::Text(prompt.to_string()),
                    name: None,
                    tool_call_id: None,
                    tool_calls: None,
                }],
                tools: None,
                tool_choice: None,
                temperature: None,
                reasoning: None,
                prompt_tokens: None,
                completion_tokens: None,
                total_tokens: None,
                cached_tokens: None,
                reasoning_tokens: None,
                finish_reason: None,
                result: None,
                error: None,
                prompt_variables: None,
                http_trace_id: None,
                trace_metadata: None,
            };
            store.insert_trace(draft).await.unwrap();
        }

        (store, project.id)
    }

    fn request(project_id: ProjectId) -> Request {
        Request {
            project_id,
            path: Some("/chat".to_string()),
            trace_id: TraceId(1),
            enqueued_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn below_min_cluster_size_is_a_noop() {
        let (store, project_id) = store_with_traces(&["Say hello to Eve"]).await;
        let config = GroupingConfig::default();
        let req = request(project_id);

        let summary = perform_grouping(&store, &config, &req).await.unwrap();
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn consistent_cluster_creates_one_implementation_and_assigns_all_traces() {
        let (store, project_id) = store_with_traces(&[
            "Say hello to Eve",
            "Say hello to Bob",
            "Say hello to Ada",
        ])
        .await;
        let config = GroupingConfig::default();
        let req = request(project_id);

        let summary = perform_grouping(&store, &config, &req)
            .await
            .unwrap()
            .expect("expected a cluster to form");

        assert_eq!(summary.clusters_created, 1);
        assert_eq!(summary.traces_assigned, 3);

        let unmatched = store
            .list_unmatched_traces(project_id, Some("/chat"))
            .await
            .unwrap();
        assert!(unmatched.is_empty());
    }

    #[tokio::test]
    async fn dissimilar_prompts_yield_no_clusters() {
        let (store, project_id) = store_with_traces(&[
            "Summarize the quarterly report.",
            "Translate this sentence to French.",
            "Write a haiku about the ocean.",
        ])
        .await;
        let config = GroupingConfig::default();
        let req = request(project_id);

        let summary = perform_grouping(&store, &config, &req).await.unwrap();
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn superseded_request_is_skipped_without_touching_the_store() {
        let (store, project_id) = store_with_traces(&[
            "Say hello to Eve",
            "Say hello to Bob",
        ])
        .await;
        let (queue, mut consumer) = crate::queue::channel(10);
        let req = request(project_id);

        queue.enqueue(req.clone());
        queue.enqueue(Request {
            trace_id: TraceId(2),
            ..req.clone()
        });

        let dequeued = consumer.recv().await.unwrap();
        assert!(consumer.is_superseded(&dequeued));

        process_request(store.clone(), GroupingConfig::default(), dequeued, &consumer).await;

        let unmatched = store
            .list_unmatched_traces(project_id, Some("/chat"))
            .await
            .unwrap();
        assert_eq!(unmatched.len(), 2, "superseded request must not cluster traces");
    }
}
