//! Batch driver running a query suite through the pipeline.
//!
//! Queries run one at a time. Each result is appended to the output file as
//! soon as it exists, so a crash keeps everything answered so far.

use super::suite::QuerySuite;
use crate::error::{RagError, Result};
use crate::persistence::append_jsonl;
use crate::pipeline::RagPipeline;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// How a batch run behaves.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Chunks retrieved per query.
    pub k: usize,
    /// Validate citations and attach reference lists.
    pub enhance: bool,
    /// Truncate the output file before the first result is written.
    pub fresh: bool,
    /// Record failed queries and keep going instead of aborting the run.
    pub continue_on_error: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            k: 5,
            enhance: false,
            fresh: false,
            continue_on_error: false,
        }
    }
}

/// Counts written next to the results once a run finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_queries: usize,
    pub by_category: BTreeMap<String, usize>,
    pub enhanced: bool,
    /// Ids of queries whose generation failed.
    #[serde(default)]
    pub failed: Vec<String>,
}

impl RunSummary {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| RagError::io(parent, e))?;
            }
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| RagError::Serialization(e.to_string()))?;
        fs::write(path, json).map_err(|e| RagError::io(path, e))
    }
}

pub struct EvalRunner<'a> {
    pipeline: &'a RagPipeline,
    options: RunOptions,
}

impl<'a> EvalRunner<'a> {
    pub fn new(pipeline: &'a RagPipeline, options: RunOptions) -> Self {
        Self { pipeline, options }
    }

    /// Answer every query in `suite`, appending each result to `output`.
    ///
    /// Without `continue_on_error` the first failed query aborts the run;
    /// results written before it stay in the file. Rerunning without `fresh`
    /// appends a second copy of every result.
    pub async fn run(&self, suite: &QuerySuite, output: &Path) -> Result<RunSummary> {
        self.prepare_output(output)?;

        let total = suite.len();
        let mode = if self.options.enhance { "enhanced" } else { "baseline" };
        info!(queries = total, mode, output = %output.display(), "starting evaluation run");

        let mut summary = RunSummary {
            total_queries: total,
            enhanced: self.options.enhance,
            ..Default::default()
        };

        for (i, item) in suite.queries().enumerate() {
            *summary.by_category.entry(item.category.clone()).or_default() += 1;
            info!(current = i + 1, total, query_id = %item.id, "processing query");

            let mut result = match self
                .pipeline
                .query(&item.query, self.options.k, self.options.enhance)
                .await
            {
                Ok(result) => result,
                Err(e) if self.options.continue_on_error => {
                    error!(query_id = %item.id, error = %e, "query failed; continuing");
                    summary.failed.push(item.id.clone());
                    continue;
                }
                Err(e) => {
                    error!(query_id = %item.id, error = %e, "query failed; aborting run");
                    return Err(e);
                }
            };

            result.query_id = Some(item.id.clone());
            result.category = Some(item.category.clone());
            result.phase1_task = Some(
                item.phase1_task
                    .clone()
                    .unwrap_or_else(|| "general".to_string()),
            );

            append_jsonl(output, &result)?;
        }

        info!(
            completed = total - summary.failed.len(),
            failed = summary.failed.len(),
            "evaluation run finished"
        );
        Ok(summary)
    }

    fn prepare_output(&self, output: &Path) -> Result<()> {
        if self.options.fresh {
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(|e| RagError::io(parent, e))?;
                }
            }
            fs::write(output, "").map_err(|e| RagError::io(output, e))?;
        } else if fs::metadata(output).is_ok_and(|m| m.len() > 0) {
            warn!(
                output = %output.display(),
                "output already has results; new results will be appended"
            );
        }
        Ok(())
    }
}
