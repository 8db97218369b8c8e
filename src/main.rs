mod agenda;
mod app;
mod board;
mod crm;
mod domain;
mod letter;
mod printout;
mod query;
mod settings;

use std::env;

use app::{APP_NAME, GuestLetterApp};
use eframe::NativeOptions;
use settings::LaunchLocation;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let launch = LaunchLocation::from_args(env::args());
    let options = NativeOptions::default();
    eframe::run_native(
        APP_NAME,
        options,
        Box::new(move |_cc| Ok(Box::new(GuestLetterApp::new(launch)))),
    )
}
