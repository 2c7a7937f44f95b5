//! Worker-fleet reconciliation: given a current `SCALING`
//! map and optional per-kind deltas, compute the ordinal sets to create
//! and destroy, then apply that plan by staging/enabling/disabling
//! vassal files.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use piku_config::EnvFile;
use piku_procfile::Procfile;
use piku_types::{Paths, ScalingMap};

/// The create/destroy ordinal sets for a single Procfile kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindPlan {
    pub kind: String,
    /// Ordinals to disable *before* creation, because `PIKU_AUTO_RESTART`
    /// forces every existing worker to restart with the new env. In
    /// descending order (highest ordinal first).
    pub to_prune: Vec<u32>,
    /// Ordinals to create, in ascending order.
    pub to_create: Vec<u32>,
    /// Ordinals to permanently destroy (scaled below their previous
    /// count), in descending order (highest ordinal first).
    pub to_destroy: Vec<u32>,
}

/// A full reconciliation plan across every kind in the Procfile.
#[derive(Debug, Clone)]
pub struct Plan {
    pub kinds: Vec<KindPlan>,
    pub new_scaling: ScalingMap,
}

/// Compute a reconciliation plan.
///
/// `deltas` maps raw Procfile kind keys to a signed adjustment against the
/// current `SCALING` count (defaulting to 1 when absent). A negative
/// resulting count is rejected; a delta key not present in the Procfile
/// is rejected. When `auto_restart` is true, every existing ordinal for
/// every kind is torn down and recreated (matching `PIKU_AUTO_RESTART`'s
/// "restart every worker with the new env" semantics); otherwise only the
/// incremental ordinals implied by the delta move.
pub fn compute_plan(
    current: &ScalingMap,
    deltas: &BTreeMap<String, i64>,
    procfile_kinds: &[String],
    auto_restart: bool,
) -> Result<Plan> {
    for key in deltas.keys() {
        if !procfile_kinds.iter().any(|k| k == key) {
            bail!("cannot scale {key}: not declared in Procfile");
        }
    }

    let mut kinds = Vec::new();
    let mut new_scaling = ScalingMap::new();

    for kind in procfile_kinds {
        let w = current.get_or_default(kind);
        let delta = deltas.get(kind).copied().unwrap_or(0);
        let n = w + delta;

        if n < 0 {
            bail!("cannot scale {kind} below zero (requested {n})");
        }

        new_scaling.set(kind.clone(), n);

        let mut to_prune = Vec::new();
        let mut to_create = Vec::new();
        let mut to_destroy = Vec::new();

        if auto_restart {
            to_prune.extend((1..=w).rev().map(|x| x as u32));
            to_create.extend((1..=n).map(|x| x as u32));
        } else if n > w {
            to_create.extend(((w + 1)..=n).map(|x| x as u32));
        } else if n < w {
            to_destroy.extend(((n + 1)..=w).rev().map(|x| x as u32));
        }

        kinds.push(KindPlan { kind: kind.clone(), to_prune, to_create, to_destroy });
    }

    Ok(Plan { kinds, new_scaling })
}

/// Apply a plan: the auto-restart prune runs *before* creation (an
/// ordinal present in both `to_prune` and `to_create` must be unlinked
/// first so the freshly-enabled vassal isn't immediately deleted again),
/// the permanent `to_destroy` set is unlinked only *after* new vassals
/// are staged and enabled, and `LIVE_ENV`/`SCALING` are written last of
/// all — matching §4.5's "auto-restart prune → create → unlink
/// destroyed vassals" ordering.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    paths: &Paths,
    app: &str,
    procfile: &Procfile,
    live_env: &EnvFile,
    app_dir: &Path,
    uid: &str,
    gid: &str,
    plan: &Plan,
) -> Result<()> {
    let logs_dir = paths.logs_dir(app);
    let nginx_root = paths.nginx_root();
    std::fs::create_dir_all(&logs_dir)?;

    for kind_plan in &plan.kinds {
        for &ordinal in &kind_plan.to_prune {
            piku_vassal::disable(paths, app, &kind_plan.kind, ordinal)?;
        }
    }

    for kind_plan in &plan.kinds {
        let entry = procfile
            .get(&kind_plan.kind)
            .unwrap_or_else(|| panic!("plan references unknown Procfile kind {}", kind_plan.kind));

        for &ordinal in &kind_plan.to_create {
            let ctx = piku_vassal::VassalContext {
                app,
                kind_key: &kind_plan.kind,
                worker_kind: &entry.kind,
                command: &entry.command,
                ordinal,
                app_dir,
                logs_dir: &logs_dir,
                nginx_root: &nginx_root,
                env: live_env,
                uid,
                gid,
            };

            if let Some(body) = piku_vassal::render(&ctx)? {
                piku_vassal::stage(paths, app, &kind_plan.kind, ordinal, &body)?;
                piku_vassal::enable(paths, app, &kind_plan.kind, ordinal)?;
            }
        }
    }

    for kind_plan in &plan.kinds {
        for &ordinal in &kind_plan.to_destroy {
            piku_vassal::disable(paths, app, &kind_plan.kind, ordinal)?;
        }
    }

    piku_config::atomic_write(&paths.live_env_path(app), &live_env.to_lines())?;
    piku_config::write_scaling(&paths.scaling_path(app), &plan.new_scaling)?;

    Ok(())
}
