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

//! Storage trait and its SQLite-backed implementation. "Database is the
//! single source of truth" (§5); the queue and worker only ever hold IDs
//! and value-typed requests, never shared row objects.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::model::*;

/// Draft of a trace prior to assignment of a database id, as produced by
/// the parser registry (§4.A) or accepted directly at the trace-create
/// endpoint (§6).
#[derive(Debug, Clone)]
pub struct TraceDraft {
    pub project_id: ProjectId,
    pub implementation_id: Option<ImplementationId>,
    pub path: Option<String>,
    pub model: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub instructions: Option<String>,
    pub prompt: Option<String>,
    pub input_items: Vec<TraceInputItem>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<serde_json::Value>,
    pub temperature: Option<f64>,
    pub reasoning: Option<serde_json::Value>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cached_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
    pub finish_reason: Option<FinishReason>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub prompt_variables: Option<HashMap<String, String>>,
    pub http_trace_id: Option<HttpTraceId>,
    pub trace_metadata: Option<serde_json::Value>,
}

/// Everything needed to persist one grouping cluster — a new Task, its
/// production Implementation, and every matched trace's assignment — as a
/// single atomic unit (§4.F step 5).
#[derive(Debug, Clone)]
pub struct ClusterDraft {
    pub prompt: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_output_tokens: i64,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<serde_json::Value>,
    pub reasoning: Option<serde_json::Value>,
    pub temp: bool,
    pub assignments: Vec<(TraceId, HashMap<String, String>)>,
}

#[derive(Debug, Clone)]
pub struct ImplementationDraft {
    pub task_id: TaskId,
    pub prompt: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_output_tokens: i64,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<serde_json::Value>,
    pub reasoning: Option<serde_json::Value>,
    pub temp: bool,
}

/// Storage abstraction the ingestion service and grouping worker depend on.
/// The concrete backend (here, SQLite via `sqlx`) is swappable without
/// touching either consumer.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn get_or_create_project(&self, name: &str) -> anyhow::Result<Project>;

    async fn insert_http_trace(
        &self,
        project_id: Option<ProjectId>,
        trace: &HttpTrace,
    ) -> anyhow::Result<HttpTraceId>;

    async fn insert_trace(&self, draft: TraceDraft) -> anyhow::Result<Trace>;

    async fn update_trace_match(
        &self,
        trace_id: TraceId,
        implementation_id: ImplementationId,
        variables: HashMap<String, String>,
    ) -> anyhow::Result<()>;

    /// Implementations for `(project_id, model)`, in stable id order, used
    /// by ingestion's auto-match step and the worker's back-assign step
    /// (both consult §4.B against the same ordering rule).
    async fn list_implementations_for_project_model(
        &self,
        project_id: ProjectId,
        model: &str,
    ) -> anyhow::Result<Vec<Implementation>>;

    /// Traces with `implementation_id IS NULL` for `(project_id, path)`,
    /// feeding the grouping worker's LOADING step (§4.F).
    async fn list_unmatched_traces(
        &self,
        project_id: ProjectId,
        path: Option<&str>,
    ) -> anyhow::Result<Vec<Trace>>;

    async fn create_task(
        &self,
        project_id: ProjectId,
        path: Option<&str>,
        name: Option<&str>,
        description: Option<&str>,
    ) -> anyhow::Result<Task>;

    async fn create_implementation(
        &self,
        draft: ImplementationDraft,
    ) -> anyhow::Result<Implementation>;

    async fn set_task_production_version(
        &self,
        task_id: TaskId,
        implementation_id: ImplementationId,
    ) -> anyhow::Result<()>;

    /// Creates a Task, its production Implementation, and assigns every
    /// matched trace in `draft.assignments` to it, all inside one database
    /// transaction (§4.F step 5: "commit atomically per cluster"). Returns
    /// the number of traces assigned.
    async fn persist_cluster(
        &self,
        project_id: ProjectId,
        path: Option<&str>,
        draft: ClusterDraft,
    ) -> anyhow::Result<(Task, Implementation, usize)>;

    async fn get_evaluation_config_for_task(
        &self,
        task_id: TaskId,
    ) -> anyhow::Result<Option<EvaluationConfig>>;

    /// Used by the auto-grading dispatcher (§4.G) to resolve a matched
    /// trace's Task before looking up its EvaluationConfig.
    async fn get_task_id_for_implementation(
        &self,
        implementation_id: ImplementationId,
    ) -> anyhow::Result<Option<TaskId>>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        // An in-memory SQLite database is private to the connection that
        // created it; a pool of more than one connection would silently
        // fan out across disjoint empty databases. Cap the pool at a
        // single connection for `:memory:` URLs so the whole store shares
        // one database, matching the single-file on-disk case.
        let max_connections = if url.contains(":memory:") { 1 } else { 10 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Opens (and creates, if absent) a SQLite database file under
    /// `data_dir`, matching the teacher's `StorageConfig::data_dir` layout.
    pub async fn open_in_dir(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await.ok();
        let path = data_dir.join("tracepipe.sqlite3");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::connect(&url).await
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                path TEXT,
                production_version_id INTEGER,
                name TEXT,
                description TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS implementations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                model TEXT NOT NULL,
                temperature REAL,
                max_output_tokens INTEGER NOT NULL,
                tools TEXT,
                tool_choice TEXT,
                reasoning TEXT,
                temp INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS traces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                implementation_id INTEGER,
                path TEXT,
                model TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                instructions TEXT,
                prompt TEXT,
                input_items TEXT NOT NULL,
                tools TEXT,
                tool_choice TEXT,
                temperature REAL,
                reasoning TEXT,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                cached_tokens INTEGER,
                reasoning_tokens INTEGER,
                finish_reason TEXT,
                result TEXT,
                error TEXT,
                prompt_variables TEXT,
                http_trace_id INTEGER,
                trace_metadata TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS http_traces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status_code INTEGER,
                error TEXT,
                request BLOB NOT NULL,
                request_headers TEXT NOT NULL,
                response BLOB NOT NULL,
                response_headers TEXT NOT NULL,
                request_method TEXT,
                request_path TEXT,
                metadata TEXT,
                path TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS evaluation_configs (
                task_id INTEGER PRIMARY KEY,
                grader_ids TEXT NOT NULL,
                trace_evaluation_percentage INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_trace(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Trace> {
    let input_items: String = row.try_get("input_items")?;
    let tools: Option<String> = row.try_get("tools")?;
    let tool_choice: Option<String> = row.try_get("tool_choice")?;
    let finish_reason: Option<String> = row.try_get("finish_reason")?;
    let prompt_variables: Option<String> = row.try_get("prompt_variables")?;
    let trace_metadata: Option<String> = row.try_get("trace_metadata")?;
    let reasoning: Option<String> = row.try_get("reasoning")?;

    Ok(Trace {
        id: TraceId(row.try_get("id")?),
        project_id: ProjectId(row.try_get("project_id")?),
        implementation_id: row
            .try_get::<Option<i64>, _>("implementation_id")?
            .map(ImplementationId),
        path: row.try_get("path")?,
        model: row.try_get("model")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        instructions: row.try_get("instructions")?,
        prompt: row.try_get("prompt")?,
        input_items: serde_json::from_str(&input_items)?,
        tools: tools.map(|t| serde_json::from_str(&t)).transpose()?,
        tool_choice: tool_choice.map(|t| serde_json::from_str(&t)).transpose()?,
        temperature: row.try_get("temperature")?,
        reasoning: reasoning.map(|t| serde_json::from_str(&t)).transpose()?,
        prompt_tokens: row.try_get("prompt_tokens")?,
        completion_tokens: row.try_get("completion_tokens")?,
        total_tokens: row.try_get("total_tokens")?,
        cached_tokens: row.try_get("cached_tokens")?,
        reasoning_tokens: row.try_get("reasoning_tokens")?,
        finish_reason: finish_reason
            .map(|s| serde_json::from_value(serde_json::Value::String(s)))
            .transpose()?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        prompt_variables: prompt_variables
            .map(|v| serde_json::from_str(&v))
            .transpose()?,
        http_trace_id: row
            .try_get::<Option<i64>, _>("http_trace_id")?
            .map(HttpTraceId),
        trace_metadata: trace_metadata.map(|v| serde_json::from_str(&v)).transpose()?,
    })
}

fn row_to_implementation(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Implementation> {
    let tools: Option<String> = row.try_get("tools")?;
    let tool_choice: Option<String> = row.try_get("tool_choice")?;
    let reasoning: Option<String> = row.try_get("reasoning")?;

    Ok(Implementation {
        id: ImplementationId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        prompt: row.try_get("prompt")?,
        model: row.try_get("model")?,
        temperature: row.try_get("temperature")?,
        max_output_tokens: row.try_get("max_output_tokens")?,
        tools: tools.map(|t| serde_json::from_str(&t)).transpose()?,
        tool_choice: tool_choice.map(|t| serde_json::from_str(&t)).transpose()?,
        reasoning: reasoning.map(|t| serde_json::from_str(&t)).transpose()?,
        temp: row.try_get::<i64, _>("temp")? != 0,
    })
}

#[async_trait]
impl TraceStore for SqliteStore {
    async fn get_or_create_project(&self, name: &str) -> anyhow::Result<Project> {
        if let Some(row) = sqlx::query("SELECT id, name FROM projects WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(Project {
                id: ProjectId(row.try_get("id")?),
                name: row.try_get("name")?,
            });
        }

        let id = sqlx::query("INSERT INTO projects (name) VALUES (?1)")
            .bind(name)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(Project {
            id: ProjectId(id),
            name: name.to_string(),
        })
    }

    async fn insert_http_trace(
        &self,
        project_id: Option<ProjectId>,
        trace: &HttpTrace,
    ) -> anyhow::Result<HttpTraceId> {
        let request_headers = serde_json::to_string(&trace.request_headers)?;
        let response_headers = serde_json::to_string(&trace.response_headers)?;
        let metadata = trace
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id = sqlx::query(
            r#"
            INSERT INTO http_traces
                (project_id, started_at, completed_at, status_code, error,
                 request, request_headers, response, response_headers,
                 request_method, request_path, metadata, path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(project_id.map(|p| p.0))
        .bind(trace.started_at)
        .bind(trace.completed_at)
        .bind(trace.status_code)
        .bind(&trace.error)
        .bind(&trace.request)
        .bind(request_headers)
        .bind(&trace.response)
        .bind(response_headers)
        .bind(&trace.request_method)
        .bind(&trace.request_path)
        .bind(metadata)
        .bind(&trace.path)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(HttpTraceId(id))
    }

    async fn insert_trace(&self, draft: TraceDraft) -> anyhow::Result<Trace> {
        let input_items = serde_json::to_string(&draft.input_items)?;
        let tools = draft.tools.as_ref().map(serde_json::to_string).transpose()?;
        let tool_choice = draft
            .tool_choice
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let finish_reason = draft
            .finish_reason
            .map(|f| serde_json::to_value(f))
            .transpose()?
            .map(|v| v.as_str().unwrap_or_default().to_string());
        let prompt_variables = draft
            .prompt_variables
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let trace_metadata = draft
            .trace_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let reasoning = draft
            .reasoning
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id = sqlx::query(
            r#"
            INSERT INTO traces
                (project_id, implementation_id, path, model, started_at, completed_at,
                 instructions, prompt, input_items, tools, tool_choice, temperature,
                 reasoning, prompt_tokens, completion_tokens, total_tokens, cached_tokens,
                 reasoning_tokens, finish_reason, result, error, prompt_variables,
                 http_trace_id, trace_metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                    ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
            "#,
        )
        .bind(draft.project_id.0)
        .bind(draft.implementation_id.map(|i| i.0))
        .bind(&draft.path)
        .bind(&draft.model)
        .bind(draft.started_at)
        .bind(draft.completed_at)
        .bind(&draft.instructions)
        .bind(&draft.prompt)
        .bind(input_items)
        .bind(tools)
        .bind(tool_choice)
        .bind(draft.temperature)
        .bind(reasoning)
        .bind(draft.prompt_tokens)
        .bind(draft.completion_tokens)
        .bind(draft.total_tokens)
        .bind(draft.cached_tokens)
        .bind(draft.reasoning_tokens)
        .bind(finish_reason)
        .bind(&draft.result)
        .bind(&draft.error)
        .bind(prompt_variables)
        .bind(draft.http_trace_id.map(|i| i.0))
        .bind(trace_metadata)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let row = sqlx::query("SELECT * FROM traces WHERE id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row_to_trace(&row)
    }

    async fn update_trace_match(
        &self,
        trace_id: TraceId,
        implementation_id: ImplementationId,
        variables: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let variables_json = serde_json::to_string(&variables)?;
        sqlx::query(
            "UPDATE traces SET implementation_id = ?1, prompt_variables = ?2 WHERE id = ?3",
        )
        .bind(implementation_id.0)
        .bind(variables_json)
        .bind(trace_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_implementations_for_project_model(
        &self,
        project_id: ProjectId,
        model: &str,
    ) -> anyhow::Result<Vec<Implementation>> {
        let rows = sqlx::query(
            r#"
            SELECT implementations.* FROM implementations
            JOIN tasks ON tasks.id = implementations.task_id
            WHERE tasks.project_id = ?1 AND implementations.model = ?2
            ORDER BY implementations.id ASC
            "#,
        )
        .bind(project_id.0)
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_implementation).collect()
    }

    async fn list_unmatched_traces(
        &self,
        project_id: ProjectId,
        path: Option<&str>,
    ) -> anyhow::Result<Vec<Trace>> {
        let rows = match path {
            Some(path) => {
                sqlx::query(
                    "SELECT * FROM traces WHERE project_id = ?1 AND path = ?2 \
                     AND implementation_id IS NULL ORDER BY id ASC",
                )
                .bind(project_id.0)
                .bind(path)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM traces WHERE project_id = ?1 AND path IS NULL \
                     AND implementation_id IS NULL ORDER BY id ASC",
                )
                .bind(project_id.0)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_trace).collect()
    }

    async fn create_task(
        &self,
        project_id: ProjectId,
        path: Option<&str>,
        name: Option<&str>,
        description: Option<&str>,
    ) -> anyhow::Result<Task> {
        let id = sqlx::query(
            "INSERT INTO tasks (project_id, path, name, description) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(project_id.0)
        .bind(path)
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Task {
            id: TaskId(id),
            project_id,
            path: path.map(String::from),
            production_version_id: None,
            name: name.map(String::from),
            description: description.map(String::from),
        })
    }

    async fn create_implementation(
        &self,
        draft: ImplementationDraft,
    ) -> anyhow::Result<Implementation> {
        let tools = draft.tools.as_ref().map(serde_json::to_string).transpose()?;
        let tool_choice = draft
            .tool_choice
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let reasoning = draft
            .reasoning
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id = sqlx::query(
            r#"
            INSERT INTO implementations
                (task_id, prompt, model, temperature, max_output_tokens, tools,
                 tool_choice, reasoning, temp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(draft.task_id.0)
        .bind(&draft.prompt)
        .bind(&draft.model)
        .bind(draft.temperature)
        .bind(draft.max_output_tokens)
        .bind(tools)
        .bind(tool_choice)
        .bind(reasoning)
        .bind(draft.temp as i64)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Implementation {
            id: ImplementationId(id),
            task_id: draft.task_id,
            prompt: draft.prompt,
            model: draft.model,
            temperature: draft.temperature,
            max_output_tokens: draft.max_output_tokens,
            tools: draft.tools,
            tool_choice: draft.tool_choice,
            reasoning: draft.reasoning,
            temp: draft.temp,
        })
    }

    async fn set_task_production_version(
        &self,
        task_id: TaskId,
        implementation_id: ImplementationId,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE tasks SET production_version_id = ?1 WHERE id = ?2")
            .bind(implementation_id.0)
            .bind(task_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn persist_cluster(
        &self,
        project_id: ProjectId,
        path: Option<&str>,
        draft: ClusterDraft,
    ) -> anyhow::Result<(Task, Implementation, usize)> {
        let tools = draft.tools.as_ref().map(serde_json::to_string).transpose()?;
        let tool_choice = draft
            .tool_choice
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let reasoning = draft
            .reasoning
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let task_id = sqlx::query(
            "INSERT INTO tasks (project_id, path, name, description) VALUES (?1, ?2, NULL, NULL)",
        )
        .bind(project_id.0)
        .bind(path)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let implementation_id = sqlx::query(
            r#"
            INSERT INTO implementations
                (task_id, prompt, model, temperature, max_output_tokens, tools,
                 tool_choice, reasoning, temp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(task_id)
        .bind(&draft.prompt)
        .bind(&draft.model)
        .bind(draft.temperature)
        .bind(draft.max_output_tokens)
        .bind(&tools)
        .bind(&tool_choice)
        .bind(&reasoning)
        .bind(draft.temp as i64)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE tasks SET production_version_id = ?1 WHERE id = ?2")
            .bind(implementation_id)
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        let mut assigned = 0usize;
        for (trace_id, variables) in &draft.assignments {
            let variables_json = serde_json::to_string(variables)?;
            sqlx::query(
                "UPDATE traces SET implementation_id = ?1, prompt_variables = ?2 WHERE id = ?3",
            )
            .bind(implementation_id)
            .bind(variables_json)
            .bind(trace_id.0)
            .execute(&mut *tx)
            .await?;
            assigned += 1;
        }

        tx.commit().await?;

        let task = Task {
            id: TaskId(task_id),
            project_id,
            path: path.map(String::from),
            production_version_id: Some(ImplementationId(implementation_id)),
            name: None,
            description: None,
        };
        let implementation = Implementation {
            id: ImplementationId(implementation_id),
            task_id: TaskId(task_id),
            prompt: draft.prompt,
            model: draft.model,
            temperature: draft.temperature,
            max_output_tokens: draft.max_output_tokens,
            tools: draft.tools,
            tool_choice: draft.tool_choice,
            reasoning: draft.reasoning,
            temp: draft.temp,
        };

        Ok((task, implementation, assigned))
    }

    async fn get_evaluation_config_for_task(
        &self,
        task_id: TaskId,
    ) -> anyhow::Result<Option<EvaluationConfig>> {
        let row = sqlx::query(
            "SELECT grader_ids, trace_evaluation_percentage FROM evaluation_configs \
             WHERE task_id = ?1",
        )
        .bind(task_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let grader_ids: String = row.try_get("grader_ids")?;
        let grader_ids: Vec<i64> = serde_json::from_str(&grader_ids)?;

        Ok(Some(EvaluationConfig {
            task_id,
            grader_ids: grader_ids.into_iter().map(GraderId).collect(),
            trace_evaluation_percentage: row.try_get::<i64, _>("trace_evaluation_percentage")? as u8,
        }))
    }

    async fn get_task_id_for_implementation(
        &self,
        implementation_id: ImplementationId,
    ) -> anyhow::Result<Option<TaskId>> {
        let row = sqlx::query("SELECT task_id FROM implementations WHERE id = ?1")
            .bind(implementation_id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(TaskId(row.try_get("task_id")?))),
            None => Ok(None),
        }
    }
}
