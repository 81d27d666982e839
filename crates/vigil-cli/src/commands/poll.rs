use anyhow::Result;
use vigil_application::commands::{CommandPlan, plan_batch};
use vigil_core::controller::ControllerTransport;
use vigil_core::record::RecordStore;
use vigil_infrastructure::{HttpController, TomlRecordStore, VigilPaths, load_settings};

/// Fetches one command batch and applies its record changes.
///
/// Restarts and forced updates need a running supervisor and are only reported.
pub async fn poll(paths: &VigilPaths) -> Result<()> {
    let settings = load_settings(paths.settings_file())?;
    let store = TomlRecordStore::new(paths.record_file());
    let machine_tag = store.load()?.machine_tag;

    let controller = HttpController::new(&settings.controller)?;
    let batch = controller.fetch_commands(&machine_tag).await?;
    let plan = plan_batch(&batch);

    apply(&store, &plan)?;
    for line in summary(&plan) {
        println!("{}", line);
    }
    Ok(())
}

fn apply(store: &dyn RecordStore, plan: &CommandPlan) -> Result<()> {
    for patch in &plan.patches {
        store.update(patch)?;
    }
    Ok(())
}

fn summary(plan: &CommandPlan) -> Vec<String> {
    if plan.is_empty() {
        return vec!["No commands pending".to_string()];
    }
    let mut lines = vec![format!("Applied {} record change(s)", plan.patches.len())];
    if let Some(at) = plan.update_at {
        lines.push(format!("Forced update requested for {} (not run here)", at));
    }
    if plan.restart {
        lines.push("A running agent would restart now".to_string());
    }
    lines
}
