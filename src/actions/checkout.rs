//! `checkout`: clone or update a git repository in the workspace

use super::{Action, ActionContext, ActionError, ActionOutput};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct Checkout;

impl Checkout {
    /// `--depth` arguments for a fetch depth; 0 means full history
    fn depth_args(ctx: &ActionContext<'_>) -> Result<Vec<String>, ActionError> {
        let depth = match ctx.param("fetch-depth") {
            None => 1,
            Some(raw) => raw.parse::<u32>().map_err(|_| ActionError::InvalidParam {
                name: "fetch-depth".to_string(),
                reason: format!("'{}' is not a non-negative integer", raw),
            })?,
        };
        Ok(if depth == 0 {
            Vec::new()
        } else {
            vec![format!("--depth={}", depth)]
        })
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl Action for Checkout {
    fn name(&self) -> &'static str {
        "checkout"
    }

    fn declared_keys(&self, _params: &BTreeMap<String, String>) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
        let path = ctx.env.resolve(ctx.param("path").unwrap_or("."));
        let path_arg = path.display().to_string();
        let depth = Self::depth_args(ctx)?;
        let reference = ctx.param("ref");
        let mut output = ActionOutput::new();

        if path.join(".git").exists() {
            info!("[{}] updating existing checkout in {}", ctx.step_id, path_arg);
            if reference.is_none() {
                output.log_line(format!("{} is already checked out", path_arg));
                return Ok(output);
            }
        } else {
            let repository = ctx.require("repository")?;
            info!("[{}] cloning {} into {}", ctx.step_id, repository, path_arg);
            let mut clone = args(&["clone"]);
            clone.extend(depth.iter().cloned());
            clone.push(repository.to_string());
            clone.push(path_arg.clone());
            let result = ctx.run_program("git", &clone).await?;
            output.log_output(&result.combined());
        }

        if let Some(reference) = reference {
            let mut fetch = args(&["-C", &path_arg, "fetch"]);
            fetch.extend(depth.iter().cloned());
            fetch.push("origin".to_string());
            fetch.push(reference.to_string());
            let result = ctx.run_program("git", &fetch).await?;
            output.log_output(&result.combined());

            let result = ctx
                .run_program("git", &args(&["-C", &path_arg, "checkout", "--force", "FETCH_HEAD"]))
                .await?;
            output.log_output(&result.combined());
            output.log_line(format!("checked out {} in {}", reference, path_arg));
        }

        Ok(output)
    }
}
