use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use agent_provider::StreamProvider;
use agent_provider_mock::ScriptedProvider;
use agent_stream::{logging, AgentConfig, CancelSignal, Session};
use coding_agent::console::{self, ConsoleOperator};
use signal_hook::consts::SIGINT;

fn main() -> io::Result<()> {
    let config = AgentConfig::from_env().map_err(io::Error::other)?;
    logging::init(&config).map_err(io::Error::other)?;

    let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
    install_interrupt_handlers(&cancel)?;

    let provider = Arc::new(ScriptedProvider::default());
    let profile = provider.profile();
    let mut session = Session::from_config(&config, provider).map_err(io::Error::other)?;
    tracing::info!(
        provider = %profile.provider_id,
        model = %profile.model_id,
        "coding agent started"
    );

    let stdin = io::stdin();
    let mut operator = ConsoleOperator::new(stdin.lock(), io::stdout());
    println!(
        "coding_agent ready ({}/{}). Type /help for commands.",
        profile.provider_id, profile.model_id
    );

    console::run(&mut session, &mut operator, &cancel)
}

/// First Ctrl-C raises the cancel flag; a second one while it is still
/// raised exits the process.
fn install_interrupt_handlers(cancel: &CancelSignal) -> io::Result<()> {
    signal_hook::flag::register_conditional_shutdown(SIGINT, 130, Arc::clone(cancel))?;
    signal_hook::flag::register(SIGINT, Arc::clone(cancel))?;
    Ok(())
}
