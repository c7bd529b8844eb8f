use std::env;

use reaktor::config::Config;
use reaktor::error::ServerError;
use reaktor::reactor::Server;

fn main() -> Result<(), ServerError> {
    env_logger::init();

    let mut config = Config::default();
    if let Some(port) = env::args().nth(1) {
        config.port = port.parse().map_err(|_| ServerError::InvalidPort(port))?;
    }

    let mut server = Server::new(config)?;
    server.run();

    Ok(())
}
