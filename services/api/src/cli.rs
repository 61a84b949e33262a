use crate::demo::{run_demo, run_window, DemoArgs, WindowArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use hostel_allocation::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Hostel Allocation",
    about = "Run the hostel allocation service or exercise it from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Evaluate an admission window for the given dates and print the report
    Window(WindowArgs),
    /// Run an allocation and refund walkthrough against a seeded campus
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Seed the in-memory store with a demo campus before serving
    #[arg(long)]
    pub(crate) seed_demo: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Window(args) => run_window(args),
        Command::Demo(args) => run_demo(args),
    }
}
