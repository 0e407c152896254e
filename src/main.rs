pub mod app;
pub mod renderer;

use app::App;
use color_eyre::Result;

fn main() {
    // The event loop and renderer report failures as values; deciding to
    // terminate (and with which status) happens only here.
    if let Err(err) = run() {
        log::error!("fatal error: {err:?}");
        std::process::exit(-1);
    }
}

fn run() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let app = App::new()?;
    app.run()?;

    Ok(())
}
