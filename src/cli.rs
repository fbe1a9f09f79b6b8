use clap::Parser;

/// Offline asset cache in front of the kiosk application.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", default_value = "./config.toml")]
    pub config: String,
}
