//! The support team: verification gate, music and invoice sub-agents under a supervisor

use std::sync::Arc;

use chorus_agent::{
    ChatModel, GraphConfig, GraphRunner, OutputMode, Persistence, ReactAgent, Supervisor,
    VerificationGate,
};

use crate::catalog::Catalog;
use crate::prompts;
use crate::resolver::CatalogResolver;
use crate::tools;

/// Wire the verification gate and the support team into a graph runner
pub fn build_runner(
    model: &ChatModel,
    catalog: &Arc<Catalog>,
    persistence: Persistence,
    output_mode: OutputMode,
    graph: GraphConfig,
) -> GraphRunner {
    let gate = VerificationGate::with_model(
        model.clone(),
        Box::new(CatalogResolver::new(Arc::clone(catalog))),
    );
    GraphRunner::new(gate, Arc::new(supervisor(model, catalog, output_mode)), persistence, graph)
}

/// Supervisor routing between the music and invoice sub-agents
pub fn supervisor(model: &ChatModel, catalog: &Arc<Catalog>, output_mode: OutputMode) -> Supervisor {
    let music = ReactAgent::new(
        prompts::MUSIC_AGENT_NAME,
        prompts::MUSIC_AGENT_DESCRIPTION,
        prompts::MUSIC_AGENT_PROMPT,
        model.clone(),
    )
    .with_tools(tools::music_tools(catalog))
    .with_preference_recall();

    let invoice = ReactAgent::new(
        prompts::INVOICE_AGENT_NAME,
        prompts::INVOICE_AGENT_DESCRIPTION,
        prompts::INVOICE_AGENT_PROMPT,
        model.clone(),
    )
    .with_tools(tools::invoice_tools(catalog));

    Supervisor::new(prompts::SUPERVISOR_PROMPT, model.clone())
        .with_agent(music)
        .with_agent(invoice)
        .with_output_mode(output_mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixture;
    use chorus_agent::{ModelSettings, ProviderTransport, ThreadId};
    use chorus_ai::providers::openai::OpenAIProvider;

    fn offline_model() -> ChatModel {
        let transport = ProviderTransport::new(Arc::new(OpenAIProvider::without_key()));
        ChatModel::new(
            Arc::new(transport),
            ModelSettings::new(chorus_ai::models::resolve_model(
                chorus_ai::Provider::OpenAI,
                "o3-mini",
                None,
            )),
        )
    }

    #[test]
    fn test_supervisor_knows_both_agents() {
        let catalog = Arc::new(fixture::catalog());
        let supervisor = supervisor(&offline_model(), &catalog, OutputMode::default());
        assert_eq!(
            supervisor.agent_names(),
            vec![prompts::MUSIC_AGENT_NAME, prompts::INVOICE_AGENT_NAME]
        );
    }

    #[test]
    fn test_runner_starts_without_threads() {
        let catalog = Arc::new(fixture::catalog());
        let runner = build_runner(
            &offline_model(),
            &catalog,
            Persistence::in_memory(),
            OutputMode::default(),
            GraphConfig::default(),
        );
        assert!(runner.threads().unwrap().is_empty());
        assert!(runner.checkpoint(&ThreadId::generate()).unwrap().is_none());
    }
}
