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

use std::sync::Arc;

use tracepipe_core::store::TraceStore;
use tracepipe_grouping::GroupingQueue;
use tracepipe_parsers::ParserRegistry;

/// Shared application state threaded through every axum handler (§6).
/// Holds no singletons: the grouping queue is constructed once in
/// [`crate::run`] and handed here, per spec.md §9's redesign flag against
/// a process-global queue.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TraceStore>,
    pub parsers: Arc<ParserRegistry>,
    pub grouping: GroupingQueue,
}
