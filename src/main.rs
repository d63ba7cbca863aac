mod app;

use color_eyre::Result;
use raw_window_handle::HasDisplayHandle;
use winit::event_loop::EventLoop;
use framechain::renderer::config::RenderConfig;
use framechain::renderer::contexts::device_ctx::device::RenderDevice;
use framechain::renderer::contexts::device_ctx::instance::RenderInstance;
use app::App;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = RenderConfig::from_env();
    log::debug!("{:?}", config);

    let event_loop = EventLoop::new()?;
    let instance = RenderInstance::new(Some(event_loop.display_handle()?.as_raw()), &config)?;
    let device = RenderDevice::new(&instance, &config)?;

    let mut app = App::new(&instance, &device, config);
    event_loop.run_app(&mut app)?;

    app.take_error().map_or(Ok(()), Err)
}
