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

//! Auto-grading dispatcher (§4.G): a thin scheduler. Actual grading logic
//! is out of scope (spec.md §4.G "actual grading logic is out of scope");
//! dispatched jobs here just log their intent to run a grader against a
//! trace, matching the "independent database session" requirement by
//! opening their own connection through the shared pool-backed store.

use std::sync::Arc;

use rand::Rng;
use tracepipe_core::model::{GraderId, ImplementationId, TraceId};
use tracepipe_core::store::TraceStore;

/// Admits a trace with probability `percentage / 100`. Decided once per
/// trace (§4.G "Admission is decided once per trace").
fn admits(percentage: u8) -> bool {
    if percentage == 0 {
        return false;
    }
    if percentage >= 100 {
        return true;
    }
    rand::thread_rng().gen_range(0..100) < percentage
}

/// Looks up the Task behind `implementation_id`, and if it has an
/// EvaluationConfig that admits this trace, schedules one detached job per
/// configured grader. Dispatched jobs have no inter-job ordering
/// requirement (§4.G "Ordering").
pub async fn dispatch(
    store: Arc<dyn TraceStore>,
    trace_id: TraceId,
    implementation_id: ImplementationId,
) {
    let task_id = match store.get_task_id_for_implementation(implementation_id).await {
        Ok(Some(id)) => id,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(%trace_id, error = %err, "failed to resolve task for auto-grading");
            return;
        }
    };

    let config = match store.get_evaluation_config_for_task(task_id).await {
        Ok(Some(cfg)) => cfg,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(%trace_id, error = %err, "failed to load evaluation config");
            return;
        }
    };

    if !admits(config.trace_evaluation_percentage) {
        return;
    }

    for grader_id in config.grader_ids {
        let store = store.clone();
        tokio::spawn(async move {
            run_grader(store, trace_id, grader_id).await;
        });
    }
}

async fn run_grader(_store: Arc<dyn TraceStore>, trace_id: TraceId, grader_id: GraderId) {
    tracing::info!(%trace_id, %grader_id, "dispatched auto-grading job");
}
