//! `srcdst resolve` - check provider IDs without touching the cluster.

use anyhow::Result;
use serde::Serialize;

use crate::Context;
use crate::cli::ResolveArgs;
use crate::ui;

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Resolution {
    provider_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'static str>,
}

fn resolve_one(provider_id: &str) -> Resolution {
    match srcdstkit::resolve(provider_id) {
        Ok(id) => Resolution {
            provider_id: provider_id.to_string(),
            instance_id: Some(id.into_inner()),
            error: None,
            category: None,
        },
        Err(e) => Resolution {
            provider_id: provider_id.to_string(),
            instance_id: None,
            category: Some(e.category().label()),
            error: Some(e.to_string()),
        },
    }
}

pub fn run(ctx: &Context, args: ResolveArgs) -> Result<()> {
    let results: Vec<Resolution> = args.provider_ids.iter().map(|p| resolve_one(p)).collect();
    let failed = results.iter().filter(|r| r.error.is_some()).count();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for r in &results {
            match (&r.instance_id, &r.error) {
                (Some(id), _) => ui::success(&format!("{} → {}", r.provider_id, id)),
                (None, Some(err)) => ui::error(err),
                (None, None) => {}
            }
        }
        if ctx.verbose > 0 {
            ui::dim(&format!("{} resolved, {} failed", results.len() - failed, failed));
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} provider IDs could not be resolved", failed, results.len());
    }
    Ok(())
}
