pub mod app;
pub mod renderer;

use color_eyre::Result;
use app::App;
use renderer::config::RenderConfig;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = RenderConfig::from_env()?;
    log::info!("Starting with {:?}", config);

    App::new(config).run()
}
