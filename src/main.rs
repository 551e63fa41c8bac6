mod api;
mod config;
mod metrics;
mod models;
mod ui;

pub fn main() -> iced::Result {
    if let Err(err) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .with_module_level("localchat", log::LevelFilter::Info)
        .env()
        .init()
    {
        eprintln!("Failed to initialise logging: {}", err);
    }

    iced::application(ui::init, ui::update, ui::view)
        .title("Local LLM Chat")
        .theme(ui::theme)
        .run()
}
