//! Per-request summaries of a batch.

use std::fmt::Write as _;

use provisioning::{ProvisioningRequest, ProvisioningResult, ProvisioningStep};
use serde::Serialize;
use workflow::{RunOutcome, StepError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum RequestReport {
    Succeeded {
        result: ProvisioningResult,
    },
    Failed {
        request: ProvisioningRequest,
        step: ProvisioningStep,
        cause: StepError,
        message: String,
        partial: ProvisioningResult,
    },
}

impl RequestReport {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl From<RunOutcome> for RequestReport {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            Ok(result) => Self::Succeeded { result },
            Err(err) => Self::Failed {
                message: err.cause.to_string(),
                request: err.partial.request.clone(),
                step: err.step,
                cause: err.cause,
                partial: *err.partial,
            },
        }
    }
}

/// Human-readable report: one block per request.
pub fn render_text(reports: &[RequestReport]) -> String {
    let mut out = String::new();
    for report in reports {
        match report {
            RequestReport::Succeeded { result } => {
                let _ = writeln!(
                    out,
                    "ok      {} -> {}",
                    result.request.queue_base_name, result.request.api_name
                );
                if let Some(url) = &result.invoke_url {
                    let _ = writeln!(out, "  invoke url: {url}");
                }
                write_identifiers(&mut out, result);
            }
            RequestReport::Failed {
                request,
                step,
                message,
                partial,
                ..
            } => {
                let _ = writeln!(
                    out,
                    "FAILED  {} -> {} at {step}: {message}",
                    request.queue_base_name, request.api_name
                );
                write_identifiers(&mut out, partial);
            }
        }
    }
    let failed = reports.iter().filter(|r| r.is_failure()).count();
    let _ = writeln!(
        out,
        "{} succeeded, {failed} failed",
        reports.len() - failed
    );
    out
}

fn write_identifiers(out: &mut String, result: &ProvisioningResult) {
    if let Some(queue) = &result.queue {
        let _ = writeln!(out, "  queue url:  {}", queue.url);
        if let Some(arn) = &queue.arn {
            let _ = writeln!(out, "  queue arn:  {arn}");
        }
    }
    if let Some(api) = &result.api {
        let _ = writeln!(out, "  api id:     {}", api.id);
    }
    if let Some(grant) = &result.permission {
        let _ = writeln!(
            out,
            "  permission: {} on {}",
            grant.statement_id, grant.function_ref
        );
    }
}
