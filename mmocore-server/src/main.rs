use anyhow::Result;
use mmocore::MmoController;
use mmocore_server::config::Config;
use mmocore_server::protocol::{LoginProtocol, opcode_table};

fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("mmocore={}", config.log_level).parse()?)
                .add_directive(format!("mmocore_server={}", config.log_level).parse()?),
        )
        .init();

    let controller = MmoController::start(
        config.listen_addr()?,
        config.engine.clone(),
        LoginProtocol,
        opcode_table(),
    )?;

    tracing::info!("mmocore server listening on {}", controller.local_addr());

    // The engine runs on its own threads; this one just sleeps.
    loop {
        std::thread::park();
    }
}
