use super::TaskPlaybook;
use crate::runtime::AgentRuntime;
use vigil_core::recovery::Flow;

pub(super) async fn in_task(agent: &mut AgentRuntime, playbook: &dyn TaskPlaybook) -> Flow<()> {
    let window = agent.window()?;
    let end_task = agent.settings.signatures.end_task.clone();
    if agent.desktop.click_match(&window, &end_task).await? {
        tracing::info!("[Task] task over, leaving");
        agent.session.clock.refresh();
        return Ok(());
    }
    playbook.step(&agent.desktop, &window).await
}
